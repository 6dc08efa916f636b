//! Risk & Margin Balancer
//!
//! Periodic reconciliation task: tops up isolated margin from free balance
//! while a position is open, and flattens the session when price escapes
//! the configured bounds or unrealized P&L outruns the account. Runs
//! independently of the reactor and never touches the ladder.

use std::sync::Arc;

use arachne_core::PositionRisk;
use arachne_gateway::{ExchangeGateway, MarginAction, OrderRequest, with_retry};
use log::{error, info, warn};
use rust_decimal::Decimal;
use tokio::sync::watch;

use crate::config::SessionConfig;
use crate::error::EngineError;
use crate::session::FlattenGuard;

pub struct RiskBalancer {
    config: SessionConfig,
    gateway: Arc<dyn ExchangeGateway>,
    flatten: Arc<FlattenGuard>,
    /// Anchor for the bound checks, captured at session start
    entry_price: Decimal,
    /// Set to request session shutdown after a flatten
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl RiskBalancer {
    pub fn new(
        config: SessionConfig,
        gateway: Arc<dyn ExchangeGateway>,
        flatten: Arc<FlattenGuard>,
        entry_price: Decimal,
        shutdown_tx: Arc<watch::Sender<bool>>,
    ) -> Self {
        Self {
            config,
            gateway,
            flatten,
            entry_price,
            shutdown_tx,
        }
    }

    /// Drive the balancer until shutdown or a flatten
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), EngineError> {
        let mut ticker = tokio::time::interval(self.config.balancer_interval);
        // The first tick of a tokio interval fires immediately; skip it so
        // the session finishes seeding before the first reconciliation
        ticker.tick().await;

        info!(
            "[RISK] {} balancer started ({:?} interval)",
            self.config.symbol, self.config.balancer_interval
        );
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(false) => {}
                        Ok(true) => break,
                        Err(e) => {
                            error!("[RISK] {} balancer failed: {}", self.config.symbol, e);
                            return Err(e);
                        }
                    }
                }
            }
        }
        info!("[RISK] {} balancer stopped", self.config.symbol);
        Ok(())
    }

    /// One reconciliation pass; returns true when the session was flattened
    pub async fn tick(&self) -> Result<bool, EngineError> {
        let gateway = self.gateway.as_ref();
        let symbol = self.config.symbol.as_str();

        let risk = with_retry("position_risk", self.config.retry, || {
            gateway.position_risk(symbol)
        })
        .await?;
        let balance = with_retry("account_balance", self.config.retry, || {
            gateway.account_balance()
        })
        .await?;

        if !risk.is_flat() {
            self.balance_margin(&risk, balance.free).await?;
        }

        let price = with_retry("current_price", self.config.retry, || {
            gateway.current_price(symbol)
        })
        .await?;

        let crossed_up = self
            .config
            .upper_bound_price(self.entry_price)
            .is_some_and(|upper| price >= upper);
        let crossed_down = self
            .config
            .lower_bound_price(self.entry_price)
            .is_some_and(|lower| price <= lower);
        let runaway = risk.unrealized_profit.abs()
            > balance.free * Decimal::from(self.config.leverage);

        if crossed_up || crossed_down || runaway {
            warn!(
                "[RISK] {} flattening: price {} (bounds crossed up={} down={}), unrealized {} vs free {}",
                symbol, price, crossed_up, crossed_down, risk.unrealized_profit, balance.free
            );
            self.flatten_position(&risk, price).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Top up isolated margin toward the configured share of free balance
    ///
    /// Margin is only ever added, never withdrawn.
    async fn balance_margin(&self, risk: &PositionRisk, free: Decimal) -> Result<(), EngineError> {
        let desired = free * self.config.margin_target;
        if risk.isolated_margin >= desired {
            return Ok(());
        }
        let delta = desired - risk.isolated_margin;
        if delta > free {
            warn!(
                "[RISK] {} margin top-up {} exceeds free balance {}, skipping",
                self.config.symbol, delta, free
            );
            return Ok(());
        }

        let gateway = self.gateway.as_ref();
        let symbol = self.config.symbol.as_str();
        let result = with_retry("set_position_margin", self.config.retry, || {
            gateway.set_position_margin(symbol, delta, MarginAction::Add)
        })
        .await;
        match result {
            Ok(()) => {
                info!(
                    "[RISK] {} isolated margin topped up by {} (target {})",
                    symbol, delta, desired
                );
                Ok(())
            }
            Err(e) if e.is_expected_rejection() => {
                warn!("[RISK] {} margin top-up rejected: {}", symbol, e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Cancel open orders (once per session) and close the position
    async fn flatten_position(&self, risk: &PositionRisk, price: Decimal) -> Result<(), EngineError> {
        let gateway = self.gateway.as_ref();
        let symbol = self.config.symbol.as_str();

        self.flatten.cancel_all(gateway, symbol, self.config.retry).await?;

        if let Some(position_side) = risk.side() {
            let close_side = position_side.opposite();
            let quantity = risk.position_amt.abs();
            let request = match self.config.callback_rate {
                Some(rate) => {
                    OrderRequest::trailing_stop(symbol, close_side, quantity, price, rate)
                }
                None => OrderRequest::close_market(symbol, close_side, quantity),
            };
            let result = with_retry("create_order", self.config.retry, || {
                gateway.create_order(&request)
            })
            .await;
            match result {
                Ok(update) => info!(
                    "[RISK] {} close order {} submitted for {} {}",
                    symbol,
                    update.order_id,
                    close_side.as_str(),
                    quantity
                ),
                Err(e) if e.is_expected_rejection() => {
                    warn!("[RISK] {} close order rejected: {}", symbol, e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Ask the session to wind down
        self.shutdown_tx.send_replace(true);
        Ok(())
    }
}
