//! Order Fill Reactor
//!
//! Reacts to own-order fill notifications: each fill consumes its ladder
//! level, extends the grid away from price when the far neighbor is free,
//! and replenishes the near neighbor so the rung can trade again. Reactions
//! are idempotent per order id and serialized by the ladder lock.

use std::sync::Arc;

use arachne_core::{Ladder, Level, OrderId, Side, SymbolRules};
use arachne_gateway::{
    ExchangeGateway, GatewayError, OrderRequest, OrderUpdate, with_retry,
};
use dashmap::DashSet;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::config::SessionConfig;
use crate::error::EngineError;

/// Upper bound on cascading fills handled inside one reaction; a real
/// cascade is bounded by ladder depth long before this
const MAX_CASCADE_DEPTH: usize = 128;

/// Why a placement leg was skipped (diagnostic, non-fatal)
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Target price lies outside the configured up/down bound
    OutOfBounds { target: Decimal },
    /// Required isolated margin exceeds the free balance
    MarginInsufficient { required: Decimal, free: Decimal },
    /// Locked balance exceeds the free balance
    BalanceLocked { locked: Decimal, free: Decimal },
    /// Target is closer to liquidation than the configured guard
    LiquidationTooClose { distance: Decimal, guard: Decimal },
    /// Order would violate the exchange minimums
    BelowExchangeMinimum { target: Decimal, quantity: Decimal },
    /// The exchange rejected the order in an expected way
    Rejected(GatewayError),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfBounds { target } => write!(f, "target {} outside session bounds", target),
            Self::MarginInsufficient { required, free } => {
                write!(f, "margin {} required but only {} free", required, free)
            }
            Self::BalanceLocked { locked, free } => {
                write!(f, "locked balance {} exceeds free balance {}", locked, free)
            }
            Self::LiquidationTooClose { distance, guard } => {
                write!(f, "liquidation distance {} below guard {}", distance, guard)
            }
            Self::BelowExchangeMinimum { target, quantity } => {
                write!(f, "{} @ {} below exchange minimums", quantity, target)
            }
            Self::Rejected(e) => write!(f, "rejected by exchange: {}", e),
        }
    }
}

/// Outcome of one reaction cycle
#[derive(Debug, Default)]
pub struct Reaction {
    /// Whether the notification passed the idempotency and status filters
    pub triggered: bool,
    /// Orders placed (or adopted) during the cycle
    pub placed: Vec<OrderId>,
    /// Legs skipped with the condition that failed
    pub skipped: Vec<SkipReason>,
    /// Immediate fills that re-entered the procedure
    pub cascades: usize,
}

enum Submission {
    Placed(OrderUpdate),
    Rejected(GatewayError),
}

/// The fill state machine for one session
pub struct FillReactor {
    config: SessionConfig,
    rules: SymbolRules,
    /// Anchor for the up/down bound checks, captured at session start
    entry_price: Decimal,
    gateway: Arc<dyn ExchangeGateway>,
    ladder: Arc<Mutex<Ladder>>,
    maintained: Arc<DashSet<OrderId>>,
}

impl FillReactor {
    pub fn new(
        config: SessionConfig,
        rules: SymbolRules,
        entry_price: Decimal,
        gateway: Arc<dyn ExchangeGateway>,
        ladder: Arc<Mutex<Ladder>>,
        maintained: Arc<DashSet<OrderId>>,
    ) -> Self {
        Self {
            config,
            rules,
            entry_price,
            gateway,
            ladder,
            maintained,
        }
    }

    /// React to one fill notification
    ///
    /// Returns without reacting for non-fill statuses, foreign symbols and
    /// ids already maintained. Structural gateway errors propagate and are
    /// fatal to the session.
    pub async fn handle_fill(&self, update: &OrderUpdate) -> Result<Reaction, EngineError> {
        let mut reaction = Reaction::default();
        if !update.is_fill() || update.symbol != self.config.symbol {
            return Ok(reaction);
        }
        // Idempotency: first insertion wins, duplicates drop here
        if !self.maintained.insert(update.order_id) {
            debug!(
                "[REACTOR] {} order {} already handled, dropping duplicate",
                self.config.symbol, update.order_id
            );
            return Ok(reaction);
        }
        reaction.triggered = true;

        let mut ladder = self.ladder.lock().await;
        let mut pending = vec![update.clone()];

        while let Some(trigger) = pending.pop() {
            if reaction.cascades >= MAX_CASCADE_DEPTH {
                warn!(
                    "[REACTOR] {} cascade depth {} reached, deferring order {}",
                    self.config.symbol, MAX_CASCADE_DEPTH, trigger.order_id
                );
                break;
            }

            let fill_price = if trigger.price.is_zero() {
                trigger.avg_price
            } else {
                trigger.price
            };
            let price = self.rules.round_price(fill_price);
            let Some(level) = ladder.get(price).cloned() else {
                warn!(
                    "[REACTOR] {} no level at {} for order {} (foreign or stale), skipping",
                    self.config.symbol, price, trigger.order_id
                );
                continue;
            };

            info!(
                "[REACTOR] {} {} fill at {} (order {}), reacting",
                self.config.symbol,
                trigger.side.as_str(),
                price,
                trigger.order_id
            );
            self.react(&mut ladder, &level, trigger.side, &mut pending, &mut reaction)
                .await?;
        }

        Ok(reaction)
    }

    /// The mirrored reaction procedure
    ///
    /// For a sell fill the far side is up and the near side is down; a buy
    /// fill mirrors both. The far leg extends the grid with a grown
    /// quantity behind the full guard set; the near leg replenishes the
    /// rung the market just crossed.
    async fn react(
        &self,
        ladder: &mut Ladder,
        level: &Level,
        fill_side: Side,
        pending: &mut Vec<OrderUpdate>,
        reaction: &mut Reaction,
    ) -> Result<(), EngineError> {
        let (far_target, near_target, far_key, near_key) = match fill_side {
            Side::Sell => (
                self.rules.price_up(level.price, self.config.delta_price),
                self.rules.price_down(level.price, self.config.delta_price),
                level.up_price,
                level.down_price,
            ),
            Side::Buy => (
                self.rules.price_down(level.price, self.config.delta_price),
                self.rules.price_up(level.price, self.config.delta_price),
                level.down_price,
                level.up_price,
            ),
        };

        // Far leg: extend away from price with a grown quantity
        let far_price = self.leg_price(ladder, far_key, far_target);
        if self.is_unbound(ladder, far_price) {
            let quantity = self
                .rules
                .round_quantity(level.quantity * (Decimal::ONE + self.config.delta_quantity));
            match self.check_extension(far_price, quantity, fill_side).await? {
                Some(reason) => {
                    warn!(
                        "[REACTOR] {} skipping extension at {}: {}",
                        self.config.symbol, far_price, reason
                    );
                    reaction.skipped.push(reason);
                }
                None => {
                    self.place_leg(
                        ladder, far_price, quantity, fill_side, level.price, pending, reaction,
                    )
                    .await?;
                }
            }
        }

        // Near leg: replenish the rung the market crossed
        let near_price = self.leg_price(ladder, near_key, near_target);
        if self.is_unbound(ladder, near_price) {
            self.place_leg(
                ladder,
                near_price,
                level.quantity,
                fill_side.opposite(),
                level.price,
                pending,
                reaction,
            )
            .await?;
        }

        // Mark the filled rung consumed
        if let Some(filled) = ladder.get_mut(level.price) {
            filled.consume();
        }
        Ok(())
    }

    /// The neighbor's recorded price when it resolves, the computed target
    /// otherwise
    fn leg_price(&self, ladder: &Ladder, key: Option<Decimal>, computed: Decimal) -> Decimal {
        key.filter(|k| ladder.contains(*k)).unwrap_or(computed)
    }

    /// Whether the rung at `price` is free for a new order
    fn is_unbound(&self, ladder: &Ladder, price: Decimal) -> bool {
        match ladder.get(price) {
            Some(neighbor) => !neighbor.is_bound(),
            None => true,
        }
    }

    /// Guard set for grid extensions (symmetric for both fill sides)
    async fn check_extension(
        &self,
        target: Decimal,
        quantity: Decimal,
        fill_side: Side,
    ) -> Result<Option<SkipReason>, EngineError> {
        let within_bounds = match fill_side {
            Side::Sell => self
                .config
                .upper_bound_price(self.entry_price)
                .is_none_or(|upper| target <= upper),
            Side::Buy => self
                .config
                .lower_bound_price(self.entry_price)
                .is_none_or(|lower| target >= lower),
        };
        if !within_bounds {
            return Ok(Some(SkipReason::OutOfBounds { target }));
        }

        if !self.rules.meets_minimums(target, quantity) {
            return Ok(Some(SkipReason::BelowExchangeMinimum { target, quantity }));
        }

        // Snapshots are always fetched fresh, never cached across reactions
        let gateway = self.gateway.as_ref();
        let symbol = self.config.symbol.as_str();
        let balance = with_retry("account_balance", self.config.retry, || {
            gateway.account_balance()
        })
        .await?;
        let risk = with_retry("position_risk", self.config.retry, || {
            gateway.position_risk(symbol)
        })
        .await?;

        let required = target * quantity / Decimal::from(self.config.leverage);
        if required > balance.free {
            return Ok(Some(SkipReason::MarginInsufficient {
                required,
                free: balance.free,
            }));
        }
        if balance.locked > balance.free {
            return Ok(Some(SkipReason::BalanceLocked {
                locked: balance.locked,
                free: balance.free,
            }));
        }
        if let Some(distance) = risk.liquidation_distance(target)
            && distance < self.config.liquidation_guard
        {
            return Ok(Some(SkipReason::LiquidationTooClose {
                distance,
                guard: self.config.liquidation_guard,
            }));
        }

        Ok(None)
    }

    /// Place one leg, bind it into the ladder and queue any immediate fill
    #[allow(clippy::too_many_arguments)]
    async fn place_leg(
        &self,
        ladder: &mut Ladder,
        target: Decimal,
        quantity: Decimal,
        side: Side,
        origin: Decimal,
        pending: &mut Vec<OrderUpdate>,
        reaction: &mut Reaction,
    ) -> Result<(), EngineError> {
        let request = OrderRequest::limit(&self.config.symbol, side, quantity, target);
        match self.submit(request).await? {
            Submission::Rejected(e) => {
                warn!(
                    "[REACTOR] {} {} leg at {} rejected: {}",
                    self.config.symbol,
                    side.as_str(),
                    target,
                    e
                );
                reaction.skipped.push(SkipReason::Rejected(e));
            }
            Submission::Placed(update) => {
                let mut placed = ladder
                    .get(target)
                    .cloned()
                    .unwrap_or_else(|| Level::new(target));
                placed.bind(quantity, side, update.order_id);
                ladder.upsert(placed);
                let (lower, upper) = if target > origin {
                    (origin, target)
                } else {
                    (target, origin)
                };
                ladder.link(lower, upper);
                reaction.placed.push(update.order_id);
                debug!(
                    "[REACTOR] {} bound order {} ({} {} @ {})",
                    self.config.symbol,
                    update.order_id,
                    side.as_str(),
                    quantity,
                    target
                );

                // Cascading fill: an immediately-filled placement re-enters
                // the procedure as its own trigger
                if update.is_fill() && self.maintained.insert(update.order_id) {
                    reaction.cascades += 1;
                    pending.push(update);
                }
            }
        }
        Ok(())
    }

    /// Create the order, absorbing expected rejections and resolving the
    /// duplicate-submission race by adopting the existing order
    async fn submit(&self, request: OrderRequest) -> Result<Submission, EngineError> {
        let gateway = self.gateway.as_ref();
        let outcome = with_retry("create_order", self.config.retry, || {
            gateway.create_order(&request)
        })
        .await;

        match outcome {
            Ok(update) => Ok(Submission::Placed(update)),
            Err(e) if e.is_expected_rejection() => Ok(Submission::Rejected(e)),
            Err(e) if e.is_duplicate() => {
                let symbol = self.config.symbol.as_str();
                let open = with_retry("open_orders", self.config.retry, || {
                    gateway.open_orders(symbol)
                })
                .await?;
                let adopted = open.into_iter().find(|o| {
                    o.side == request.side && Some(o.price) == request.price
                });
                match adopted {
                    Some(existing) => {
                        info!(
                            "[REACTOR] {} adopted existing order {} at {}",
                            self.config.symbol, existing.order_id, existing.price
                        );
                        Ok(Submission::Placed(existing))
                    }
                    // Reported duplicate but nothing to adopt: structural
                    None => Err(EngineError::Gateway(e)),
                }
            }
            Err(e) => Err(EngineError::Gateway(e)),
        }
    }
}
