//! Session configuration

use std::time::Duration;

use arachne_core::ProgressionFamily;
use arachne_gateway::{MarginType, RetryPolicy};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Everything a session needs to know before it starts
///
/// Constructed by the caller (CLI/config loading is out of scope); defaults
/// describe a conservative isolated-margin grid.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Instrument to trade
    pub symbol: String,
    /// Absolute budget for the whole position (quote asset)
    pub limit_on_position: Decimal,
    /// Fraction of the budget any single rung may consume
    pub limit_on_transaction: Decimal,
    /// Upper price bound as a fraction above the entry price
    pub up_bound: Option<Decimal>,
    /// Lower price bound as a fraction below the entry price
    pub low_bound: Option<Decimal>,
    /// Constant-percent price distance between rungs
    pub delta_price: Decimal,
    /// Percent growth of quantity on far-side extensions
    pub delta_quantity: Decimal,
    /// Minimum rung count the initial sizing must support
    pub min_steps: u32,
    pub leverage: u32,
    pub margin_type: MarginType,
    /// Trailing callback rate for flatten orders; plain reduce-only market
    /// close when unset
    pub callback_rate: Option<Decimal>,
    /// Numeric law for quantity projection
    pub progression: ProgressionFamily,
    /// Minimum relative distance to the liquidation price before extending
    pub liquidation_guard: Decimal,
    /// Fraction of free balance the balancer keeps as isolated margin
    pub margin_target: Decimal,
    /// Tick period of the risk balancer
    pub balancer_interval: Duration,
    /// Retry policy for gateway calls
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            limit_on_position: dec!(1000),
            limit_on_transaction: dec!(0.25),
            up_bound: Some(dec!(0.10)),
            low_bound: Some(dec!(0.10)),
            delta_price: dec!(0.02),
            delta_quantity: dec!(0.05),
            min_steps: 3,
            leverage: 10,
            margin_type: MarginType::Isolated,
            callback_rate: None,
            progression: ProgressionFamily::Geometric,
            liquidation_guard: dec!(0.05),
            margin_target: dec!(0.5),
            balancer_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Budget multiplied by leverage: the notional ceiling of the ladder
    pub fn notional_ceiling(&self) -> Decimal {
        self.limit_on_position * Decimal::from(self.leverage)
    }

    /// Notional ceiling of one rung
    pub fn rung_ceiling(&self) -> Decimal {
        self.limit_on_position * self.limit_on_transaction
    }

    /// Upper bound price anchored at `entry`, if configured
    pub fn upper_bound_price(&self, entry: Decimal) -> Option<Decimal> {
        self.up_bound.map(|b| entry * (Decimal::ONE + b))
    }

    /// Lower bound price anchored at `entry`, if configured
    pub fn lower_bound_price(&self, entry: Decimal) -> Option<Decimal> {
        self.low_bound.map(|b| entry * (Decimal::ONE - b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notional_ceiling() {
        let config = SessionConfig::default();
        assert_eq!(config.notional_ceiling(), dec!(10000));
        assert_eq!(config.rung_ceiling(), dec!(250));
    }

    #[test]
    fn test_bound_prices_anchor_at_entry() {
        let config = SessionConfig::default();
        assert_eq!(config.upper_bound_price(dec!(100)), Some(dec!(110.0)));
        assert_eq!(config.lower_bound_price(dec!(100)), Some(dec!(90.0)));

        let unbounded = SessionConfig {
            up_bound: None,
            low_bound: None,
            ..SessionConfig::default()
        };
        assert_eq!(unbounded.upper_bound_price(dec!(100)), None);
        assert_eq!(unbounded.lower_bound_price(dec!(100)), None);
    }
}
