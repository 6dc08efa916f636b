use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Exchange-assigned order identifier
pub type OrderId = u64;

/// Order side (Buy or Sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// One price rung in the ladder
///
/// The price is the identity of the level and never changes after insertion.
/// Neighbors are referenced by price key and resolved through the [`Ladder`],
/// never by owning pointers.
///
/// [`Ladder`]: crate::ladder::Ladder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level {
    /// Tick-rounded price, unique within a ladder
    pub price: Decimal,
    /// Quantity working (or last worked) at this rung
    pub quantity: Decimal,
    /// Live order bound to this rung, if any. At most one at a time.
    pub order_id: Option<OrderId>,
    /// Price key of the neighbor rung above
    pub up_price: Option<Decimal>,
    /// Price key of the neighbor rung below
    pub down_price: Option<Decimal>,
    /// Side of the bound order
    pub side: Option<Side>,
}

impl Level {
    /// Create an unbound level at the given price
    pub fn new(price: Decimal) -> Self {
        Self {
            price,
            quantity: Decimal::ZERO,
            order_id: None,
            up_price: None,
            down_price: None,
            side: None,
        }
    }

    /// Create a level bound to a live order
    pub fn bound(price: Decimal, quantity: Decimal, side: Side, order_id: OrderId) -> Self {
        Self {
            price,
            quantity,
            order_id: Some(order_id),
            up_price: None,
            down_price: None,
            side: Some(side),
        }
    }

    /// Whether a live order is currently bound to this rung
    pub fn is_bound(&self) -> bool {
        self.order_id.is_some()
    }

    /// Bind a live order to this rung, replacing any previous binding
    pub fn bind(&mut self, quantity: Decimal, side: Side, order_id: OrderId) {
        self.quantity = quantity;
        self.side = Some(side);
        self.order_id = Some(order_id);
    }

    /// Mark the rung consumed: drop the order binding, quantity and side
    pub fn consume(&mut self) {
        self.order_id = None;
        self.quantity = Decimal::ZERO;
        self.side = None;
    }
}
