use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::level::Side;

/// Point-in-time position risk, fetched fresh from the exchange
///
/// Never cached across reactions; every consumer asks the gateway again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRisk {
    pub symbol: String,
    /// Average entry price of the open position (zero when flat)
    pub entry_price: Decimal,
    /// Price at which realized P&L of the position would be zero
    pub break_even_price: Decimal,
    /// Signed position size (positive long, negative short)
    pub position_amt: Decimal,
    /// Forced-close price (zero when flat or cross-margined with no risk)
    pub liquidation_price: Decimal,
    pub unrealized_profit: Decimal,
    pub leverage: Decimal,
    /// Collateral assigned exclusively to this position
    pub isolated_margin: Decimal,
}

impl PositionRisk {
    /// A flat snapshot for a symbol
    pub fn flat(symbol: impl Into<String>, leverage: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            entry_price: Decimal::ZERO,
            break_even_price: Decimal::ZERO,
            position_amt: Decimal::ZERO,
            liquidation_price: Decimal::ZERO,
            unrealized_profit: Decimal::ZERO,
            leverage,
            isolated_margin: Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.position_amt.is_zero()
    }

    /// Direction of the open position, if any
    pub fn side(&self) -> Option<Side> {
        if self.position_amt > Decimal::ZERO {
            Some(Side::Buy)
        } else if self.position_amt < Decimal::ZERO {
            Some(Side::Sell)
        } else {
            None
        }
    }

    /// Relative distance from `price` to the liquidation price
    ///
    /// `None` when the exchange reports no liquidation level (flat position).
    pub fn liquidation_distance(&self, price: Decimal) -> Option<Decimal> {
        if self.liquidation_price.is_zero() || price.is_zero() {
            return None;
        }
        Some(((price - self.liquidation_price) / price).abs())
    }
}
