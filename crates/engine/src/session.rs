//! Session lifecycle
//!
//! One `Session` owns the ladder, the maintained-order set, the bound
//! progression and the gateway handle; it sizes and enters the initial
//! position, seeds the grid, runs the reactor and balancer tasks, and
//! guarantees that teardown cancels open orders exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arachne_core::{Ladder, Level, OrderId, Progression, Side, SymbolRules};
use arachne_gateway::{
    ExchangeGateway, GatewayError, OrderRequest, OrderUpdate, RetryPolicy, with_retry,
};
use dashmap::DashSet;
use log::{info, warn};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;

use crate::balancer::RiskBalancer;
use crate::config::SessionConfig;
use crate::error::EngineError;
use crate::reactor::FillReactor;

/// Exactly-once cancel-all for a session
///
/// The reactor's fatal path, the balancer's flatten and session teardown
/// may all race to cancel; the first caller wins, the rest are no-ops.
#[derive(Debug, Default)]
pub struct FlattenGuard {
    fired: AtomicBool,
}

impl FlattenGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel all open orders unless another caller already has
    pub async fn cancel_all(
        &self,
        gateway: &dyn ExchangeGateway,
        symbol: &str,
        retry: RetryPolicy,
    ) -> Result<(), GatewayError> {
        if self.fired.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("[SESSION] {} cancelling all open orders", symbol);
        with_retry("cancel_all_orders", retry, || {
            gateway.cancel_all_orders(symbol)
        })
        .await
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// External stop signal for a running session; cloneable and idempotent
#[derive(Debug, Clone)]
pub struct SessionHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    /// Request the session to flatten and terminate
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// One grid trading session over a single symbol
pub struct Session {
    config: SessionConfig,
    rules: SymbolRules,
    progression: Progression,
    gateway: Arc<dyn ExchangeGateway>,
    ladder: Arc<Mutex<Ladder>>,
    maintained: Arc<DashSet<OrderId>>,
    flatten: Arc<FlattenGuard>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        rules: SymbolRules,
        gateway: Arc<dyn ExchangeGateway>,
    ) -> Result<Self, EngineError> {
        validate(&config)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            progression: Progression::new(config.progression),
            config,
            rules,
            gateway,
            ladder: Arc::new(Mutex::new(Ladder::new())),
            maintained: Arc::new(DashSet::new()),
            flatten: Arc::new(FlattenGuard::new()),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        })
    }

    /// Handle for stopping the session from outside
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// Drive the session to completion
    ///
    /// Returns when the stop signal fires or a fatal error surfaces; either
    /// way open orders are cancelled before returning.
    pub async fn run(mut self) -> Result<(), EngineError> {
        let symbol = self.config.symbol.clone();
        info!("[SESSION] {} starting", symbol);

        let outcome = self.start_trading().await;
        let (reactor_task, balancer_task) = match outcome {
            Ok(tasks) => tasks,
            Err(e) => {
                // Failed before or during seeding: reconcile and bail
                let _ = self
                    .flatten
                    .cancel_all(self.gateway.as_ref(), &symbol, self.config.retry)
                    .await;
                return Err(e);
            }
        };

        let mut reactor_task = reactor_task;
        let mut balancer_task = balancer_task;
        let mut reactor_result: Option<Result<(), EngineError>> = None;
        let mut balancer_result: Option<Result<(), EngineError>> = None;

        tokio::select! {
            joined = &mut reactor_task => reactor_result = Some(join_task(joined)),
            joined = &mut balancer_task => balancer_result = Some(join_task(joined)),
            changed = self.shutdown_rx.changed() => {
                let _ = changed;
                info!("[SESSION] {} stop signal received", symbol);
            }
        }

        // Suppress any further reactor/balancer activity, then drain both
        self.shutdown_tx.send_replace(true);
        if reactor_result.is_none() {
            reactor_result = Some(join_task((&mut reactor_task).await));
        }
        if balancer_result.is_none() {
            balancer_result = Some(join_task((&mut balancer_task).await));
        }

        let cancel = self
            .flatten
            .cancel_all(self.gateway.as_ref(), &symbol, self.config.retry)
            .await;

        info!("[SESSION] {} terminated", symbol);
        reactor_result.unwrap_or(Ok(()))?;
        balancer_result.unwrap_or(Ok(()))?;
        cancel.map_err(EngineError::Gateway)
    }

    /// Prepare the account, size and enter the position, seed the grid and
    /// spawn the reactor and balancer tasks
    async fn start_trading(
        &self,
    ) -> Result<
        (
            JoinHandle<Result<(), EngineError>>,
            JoinHandle<Result<(), EngineError>>,
        ),
        EngineError,
    > {
        let gateway = self.gateway.as_ref();
        let symbol = self.config.symbol.as_str();
        let retry = self.config.retry;

        // Account preparation; an unchanged margin type is a no-op
        with_retry("set_leverage", retry, || {
            gateway.set_leverage(symbol, self.config.leverage)
        })
        .await?;
        let margin_type = self.config.margin_type;
        match with_retry("set_margin_type", retry, || {
            gateway.set_margin_type(symbol, margin_type)
        })
        .await
        {
            Ok(()) => {}
            Err(e) if e.is_expected_rejection() => {
                info!("[SESSION] {} margin type already {}", symbol, margin_type.as_str());
            }
            Err(e) => return Err(e.into()),
        }

        // Subscribe before entering so the entry fill cannot be missed
        let fills = self.gateway.subscribe_fills();

        let price = with_retry("current_price", retry, || gateway.current_price(symbol)).await?;
        let entry_price = self.rules.round_price(price);
        let end_price = self.sizing_end_price(entry_price);
        let sized = crate::sizing::calculate_initial_position(
            &self.config,
            &self.rules,
            &self.progression,
            entry_price,
            end_price,
        )?;

        let entry = with_retry("create_order", retry, || {
            let request = OrderRequest::market(symbol, Side::Buy, sized.quantity);
            async move { gateway.create_order(&request).await }
        })
        .await?;
        // The entry is consumed here, not by the reactor
        self.maintained.insert(entry.order_id);
        let fill_price = if entry.avg_price.is_zero() {
            entry_price
        } else {
            self.rules.round_price(entry.avg_price)
        };
        info!(
            "[SESSION] {} entered {} @ {} (order {})",
            symbol, sized.quantity, fill_price, entry.order_id
        );

        self.seed_ladder(fill_price, sized.quantity).await?;

        let reactor = FillReactor::new(
            self.config.clone(),
            self.rules.clone(),
            fill_price,
            self.gateway.clone(),
            self.ladder.clone(),
            self.maintained.clone(),
        );
        let reactor_task = tokio::spawn(reactor_loop(
            reactor,
            fills,
            self.shutdown_rx.clone(),
            self.config.symbol.clone(),
        ));

        let balancer = RiskBalancer::new(
            self.config.clone(),
            self.gateway.clone(),
            self.flatten.clone(),
            fill_price,
            self.shutdown_tx.clone(),
        );
        let balancer_task = tokio::spawn(balancer.run(self.shutdown_rx.clone()));

        Ok((reactor_task, balancer_task))
    }

    /// Root level plus the first rung on each side of the entry
    async fn seed_ladder(&self, entry_price: Decimal, quantity: Decimal) -> Result<(), EngineError> {
        let mut ladder = self.ladder.lock().await;

        let mut root = Level::new(entry_price);
        root.quantity = quantity;
        ladder.insert(root)?;

        // Sell back the entry inventory one rung up
        let up_price = self.rules.price_up(entry_price, self.config.delta_price);
        if let Some(order) = self.place_seed(up_price, quantity, Side::Sell).await? {
            let mut level = Level::bound(up_price, quantity, Side::Sell, order.order_id);
            level.down_price = Some(entry_price);
            ladder.upsert(level);
            ladder.link(entry_price, up_price);
        }

        // Accumulate a grown rung one step down
        let down_price = self.rules.price_down(entry_price, self.config.delta_price);
        let down_qty = self
            .rules
            .round_quantity(quantity * (Decimal::ONE + self.config.delta_quantity));
        if let Some(order) = self.place_seed(down_price, down_qty, Side::Buy).await? {
            let mut level = Level::bound(down_price, down_qty, Side::Buy, order.order_id);
            level.up_price = Some(entry_price);
            ladder.upsert(level);
            ladder.link(down_price, entry_price);
        }

        info!(
            "[SESSION] {} ladder seeded with {} levels around {}",
            self.config.symbol,
            ladder.len(),
            entry_price
        );
        Ok(())
    }

    /// Place one seed order; expected rejections leave the rung unbound
    async fn place_seed(
        &self,
        price: Decimal,
        quantity: Decimal,
        side: Side,
    ) -> Result<Option<OrderUpdate>, EngineError> {
        let gateway = self.gateway.as_ref();
        let request = OrderRequest::limit(&self.config.symbol, side, quantity, price);
        match with_retry("create_order", self.config.retry, || {
            gateway.create_order(&request)
        })
        .await
        {
            Ok(update) => Ok(Some(update)),
            Err(e) if e.is_expected_rejection() => {
                warn!(
                    "[SESSION] {} seed {} @ {} rejected: {}",
                    self.config.symbol,
                    side.as_str(),
                    price,
                    e
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Where the sizing projection ends: the upper bound when configured,
    /// otherwise `min_steps` constant-percent rungs above the entry
    fn sizing_end_price(&self, entry_price: Decimal) -> Decimal {
        match self.config.upper_bound_price(entry_price) {
            Some(upper) => self.rules.round_price(upper),
            None => {
                let mut price = entry_price;
                for _ in 0..self.config.min_steps {
                    price = self.rules.price_up(price, self.config.delta_price);
                }
                price
            }
        }
    }
}

/// Drain fill notifications into the reactor until shutdown
async fn reactor_loop(
    reactor: FillReactor,
    mut fills: broadcast::Receiver<OrderUpdate>,
    mut shutdown: watch::Receiver<bool>,
    symbol: String,
) -> Result<(), EngineError> {
    info!("[REACTOR] {} subscribed to fill stream", symbol);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            received = fills.recv() => match received {
                Ok(update) => {
                    reactor.handle_fill(&update).await?;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("[REACTOR] {} lagged {} fill notifications", symbol, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("[REACTOR] {} fill stream closed", symbol);
                    break;
                }
            }
        }
    }
    Ok(())
}

fn join_task(
    joined: Result<Result<(), EngineError>, tokio::task::JoinError>,
) -> Result<(), EngineError> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(EngineError::Config(format!("session task failed: {e}"))),
    }
}

fn validate(config: &SessionConfig) -> Result<(), EngineError> {
    if config.symbol.is_empty() {
        return Err(EngineError::Config("symbol must not be empty".into()));
    }
    if config.leverage == 0 {
        return Err(EngineError::Config("leverage must be at least 1".into()));
    }
    if config.limit_on_position <= Decimal::ZERO {
        return Err(EngineError::Config(
            "limit_on_position must be positive".into(),
        ));
    }
    if config.delta_price <= Decimal::ZERO || config.delta_price >= Decimal::ONE {
        return Err(EngineError::Config(
            "delta_price must lie strictly between 0 and 1".into(),
        ));
    }
    if config.delta_quantity < Decimal::ZERO {
        return Err(EngineError::Config(
            "delta_quantity must not be negative".into(),
        ));
    }
    if config.limit_on_transaction <= Decimal::ZERO || config.limit_on_transaction > Decimal::ONE {
        return Err(EngineError::Config(
            "limit_on_transaction must lie in (0, 1]".into(),
        ));
    }
    if config.margin_target < Decimal::ZERO || config.margin_target > Decimal::ONE {
        return Err(EngineError::Config(
            "margin_target must lie in [0, 1]".into(),
        ));
    }
    Ok(())
}
