//! Order message types

use arachne_core::{OrderId, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    StopMarket,
    TrailingStopMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Limit => "limit",
            Self::Market => "market",
            Self::StopMarket => "stop_market",
            Self::TrailingStopMarket => "trailing_stop_market",
        }
    }
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good Till Cancelled
    Gtc,
    /// Immediate Or Cancel
    Ioc,
    /// Fill Or Kill
    Fok,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gtc => "gtc",
            Self::Ioc => "ioc",
            Self::Fok => "fok",
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted by the exchange, resting
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::Canceled => "canceled",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    /// Fully or partially filled
    pub fn is_fill(&self) -> bool {
        matches!(self, Self::Filled | Self::PartiallyFilled)
    }

    /// No more updates expected for this order
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Rejected | Self::Expired
        )
    }
}

/// Order submission request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Client-assigned order ID for correlation
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub quantity: Decimal,
    /// Limit price (required for limit orders)
    pub price: Option<Decimal>,
    /// Trigger price for stop orders
    pub stop_price: Option<Decimal>,
    /// Activation price for trailing stops
    pub activation_price: Option<Decimal>,
    /// Trailing callback rate for trailing stops (fraction)
    pub callback_rate: Option<Decimal>,
    /// Only ever shrink the position
    pub reduce_only: bool,
    /// Close the whole position regardless of quantity
    pub close_position: bool,
}

impl OrderRequest {
    /// Create a resting limit order
    pub fn limit(symbol: impl Into<String>, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            client_order_id: new_client_order_id(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::Gtc,
            quantity,
            price: Some(price),
            stop_price: None,
            activation_price: None,
            callback_rate: None,
            reduce_only: false,
            close_position: false,
        }
    }

    /// Create a market order
    pub fn market(symbol: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            client_order_id: new_client_order_id(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Ioc,
            quantity,
            price: None,
            stop_price: None,
            activation_price: None,
            callback_rate: None,
            reduce_only: false,
            close_position: false,
        }
    }

    /// Create a reduce-only market order that flattens `quantity`
    pub fn close_market(symbol: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        let mut request = Self::market(symbol, side, quantity);
        request.reduce_only = true;
        request
    }

    /// Create a trailing-stop-market close
    pub fn trailing_stop(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        activation_price: Decimal,
        callback_rate: Decimal,
    ) -> Self {
        Self {
            client_order_id: new_client_order_id(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::TrailingStopMarket,
            time_in_force: TimeInForce::Gtc,
            quantity,
            price: None,
            stop_price: None,
            activation_price: Some(activation_price),
            callback_rate: Some(callback_rate),
            reduce_only: true,
            close_position: false,
        }
    }
}

fn new_client_order_id() -> String {
    format!("arachne-{}", Uuid::new_v4().simple())
}

/// Order state as reported by the exchange
///
/// Both the reply to `create_order` and the elements of the fill
/// notification stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdate {
    /// Exchange-assigned order ID
    pub order_id: OrderId,
    /// Client-assigned order ID (echoed back)
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub status: OrderStatus,
    /// Order price (zero for market orders)
    pub price: Decimal,
    /// Average fill price so far
    pub avg_price: Decimal,
    pub quantity: Decimal,
    /// Cumulative filled quantity
    pub executed_qty: Decimal,
    pub reduce_only: bool,
    pub timestamp: DateTime<Utc>,
}

impl OrderUpdate {
    /// Whether this update is a fill notification the reactor cares about
    pub fn is_fill(&self) -> bool {
        self.status.is_fill()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_limit_order_request() {
        let order = OrderRequest::limit("BTCUSDT", Side::Buy, dec!(0.5), dec!(50000));

        assert_eq!(order.symbol, "BTCUSDT");
        assert_eq!(order.order_type, OrderType::Limit);
        assert_eq!(order.time_in_force, TimeInForce::Gtc);
        assert_eq!(order.price, Some(dec!(50000)));
        assert!(!order.reduce_only);
        assert!(order.client_order_id.starts_with("arachne-"));
    }

    #[test]
    fn test_market_order_is_ioc() {
        let order = OrderRequest::market("BTCUSDT", Side::Sell, dec!(1));
        assert_eq!(order.order_type, OrderType::Market);
        assert_eq!(order.time_in_force, TimeInForce::Ioc);
        assert!(order.price.is_none());
    }

    #[test]
    fn test_close_market_is_reduce_only() {
        let order = OrderRequest::close_market("BTCUSDT", Side::Sell, dec!(1));
        assert!(order.reduce_only);
    }

    #[test]
    fn test_trailing_stop_fields() {
        let order = OrderRequest::trailing_stop("BTCUSDT", Side::Sell, dec!(1), dec!(51000), dec!(0.005));
        assert_eq!(order.order_type, OrderType::TrailingStopMarket);
        assert_eq!(order.activation_price, Some(dec!(51000)));
        assert_eq!(order.callback_rate, Some(dec!(0.005)));
        assert!(order.reduce_only);
    }

    #[test]
    fn test_status_predicates() {
        assert!(OrderStatus::Filled.is_fill());
        assert!(OrderStatus::PartiallyFilled.is_fill());
        assert!(!OrderStatus::New.is_fill());

        assert!(OrderStatus::Filled.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_client_order_ids_are_unique() {
        let a = OrderRequest::market("BTCUSDT", Side::Buy, dec!(1));
        let b = OrderRequest::market("BTCUSDT", Side::Buy, dec!(1));
        assert_ne!(a.client_order_id, b.client_order_id);
    }
}
