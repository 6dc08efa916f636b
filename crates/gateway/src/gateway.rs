//! The Exchange Gateway contract
//!
//! Consumed by the engine, implemented by exchange adapters (and by the
//! in-memory simulator in `arachne-exchange-sim`). Calls are awaited inline;
//! each implementation is responsible for per-call atomicity, nothing more.

use arachne_core::{OrderId, PositionRisk};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use crate::error::GatewayError;
use crate::messages::account::{AccountBalance, MarginAction, MarginType};
use crate::messages::order::{OrderRequest, OrderUpdate};

#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Latest mark/last price for the symbol
    async fn current_price(&self, symbol: &str) -> Result<Decimal, GatewayError>;

    /// Fresh position risk snapshot; callers must not cache it
    async fn position_risk(&self, symbol: &str) -> Result<PositionRisk, GatewayError>;

    /// Quote-asset balance split into free and locked
    async fn account_balance(&self) -> Result<AccountBalance, GatewayError>;

    /// All resting orders for the symbol
    async fn open_orders(&self, symbol: &str) -> Result<Vec<OrderUpdate>, GatewayError>;

    /// Submit an order; the returned update carries the exchange id and may
    /// already report a fill for marketable orders
    async fn create_order(&self, request: &OrderRequest) -> Result<OrderUpdate, GatewayError>;

    async fn cancel_order(&self, symbol: &str, order_id: OrderId) -> Result<(), GatewayError>;

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), GatewayError>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError>;

    async fn set_margin_type(
        &self,
        symbol: &str,
        margin_type: MarginType,
    ) -> Result<(), GatewayError>;

    /// Adjust isolated position margin by `amount` in the given direction
    async fn set_position_margin(
        &self,
        symbol: &str,
        amount: Decimal,
        action: MarginAction,
    ) -> Result<(), GatewayError>;

    /// Subscribe to the push stream of own-order updates
    ///
    /// Delivery is at-least-once and in upstream order; subscribers drop
    /// the receiver to unsubscribe.
    fn subscribe_fills(&self) -> broadcast::Receiver<OrderUpdate>;
}
