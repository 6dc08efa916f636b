use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::RulesError;

/// Per-symbol trading constraints, loaded once at session start
///
/// Prices round half-up to the tick; quantities truncate to the step so a
/// rounded order can never exceed what the caller sized. Both roundings are
/// idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolRules {
    /// Instrument symbol (e.g. "BTCUSDT")
    pub symbol: String,
    /// Minimum price increment
    pub tick_size: Decimal,
    /// Minimum quantity increment
    pub quantity_step: Decimal,
    /// Smallest order quantity the exchange accepts
    pub min_quantity: Decimal,
    /// Smallest order notional (price * quantity) the exchange accepts
    pub min_notional: Decimal,
}

impl SymbolRules {
    pub fn new(
        symbol: impl Into<String>,
        tick_size: Decimal,
        quantity_step: Decimal,
        min_quantity: Decimal,
        min_notional: Decimal,
    ) -> Result<Self, RulesError> {
        if tick_size <= Decimal::ZERO {
            return Err(RulesError::InvalidTickSize(tick_size));
        }
        if quantity_step <= Decimal::ZERO {
            return Err(RulesError::InvalidQuantityStep(quantity_step));
        }
        if min_notional < Decimal::ZERO {
            return Err(RulesError::InvalidMinNotional(min_notional));
        }
        Ok(Self {
            symbol: symbol.into(),
            tick_size,
            quantity_step,
            min_quantity,
            min_notional,
        })
    }

    /// Round a price to the nearest tick (half away from zero)
    pub fn round_price(&self, price: Decimal) -> Decimal {
        let ticks = (price / self.tick_size)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        ticks * self.tick_size
    }

    /// Truncate a quantity down to the step
    pub fn round_quantity(&self, quantity: Decimal) -> Decimal {
        let steps = (quantity / self.quantity_step)
            .round_dp_with_strategy(0, RoundingStrategy::ToZero);
        steps * self.quantity_step
    }

    /// Next rung above `price` for a constant-percent step
    pub fn price_up(&self, price: Decimal, delta: Decimal) -> Decimal {
        self.round_price(price * (Decimal::ONE + delta))
    }

    /// Next rung below `price` for a constant-percent step
    pub fn price_down(&self, price: Decimal, delta: Decimal) -> Decimal {
        self.round_price(price * (Decimal::ONE - delta))
    }

    /// Whether an order satisfies the exchange minimums
    pub fn meets_minimums(&self, price: Decimal, quantity: Decimal) -> bool {
        quantity >= self.min_quantity && price * quantity >= self.min_notional
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rules() -> SymbolRules {
        SymbolRules::new("BTCUSDT", dec!(0.10), dec!(0.001), dec!(0.001), dec!(5)).unwrap()
    }

    #[test]
    fn test_constructor_validation() {
        assert!(SymbolRules::new("X", dec!(0), dec!(0.001), dec!(0), dec!(0)).is_err());
        assert!(SymbolRules::new("X", dec!(0.1), dec!(-1), dec!(0), dec!(0)).is_err());
        assert!(SymbolRules::new("X", dec!(0.1), dec!(0.001), dec!(0), dec!(-5)).is_err());
    }

    #[test]
    fn test_round_price_to_tick() {
        let r = rules();
        assert_eq!(r.round_price(dec!(100.04)), dec!(100.00));
        assert_eq!(r.round_price(dec!(100.05)), dec!(100.10));
        assert_eq!(r.round_price(dec!(100.17)), dec!(100.20));
    }

    #[test]
    fn test_round_price_idempotent() {
        let r = rules();
        for raw in [dec!(99.949), dec!(100.05), dec!(0.01), dec!(123456.789)] {
            let once = r.round_price(raw);
            assert_eq!(r.round_price(once), once);
        }
    }

    #[test]
    fn test_round_quantity_truncates() {
        let r = rules();
        assert_eq!(r.round_quantity(dec!(0.0019)), dec!(0.001));
        assert_eq!(r.round_quantity(dec!(1.23456)), dec!(1.234));
        assert_eq!(r.round_quantity(r.round_quantity(dec!(1.23456))), dec!(1.234));
    }

    #[test]
    fn test_constant_percent_steps() {
        let r = rules();
        assert_eq!(r.price_up(dec!(100), dec!(0.02)), dec!(102.00));
        assert_eq!(r.price_down(dec!(100), dec!(0.02)), dec!(98.00));
        // Tick rounding applies after the percent step
        assert_eq!(r.price_up(dec!(100.10), dec!(0.02)), dec!(102.10));
    }

    #[test]
    fn test_meets_minimums() {
        let r = rules();
        assert!(r.meets_minimums(dec!(100), dec!(0.05)));
        // Below min notional
        assert!(!r.meets_minimums(dec!(100), dec!(0.001)));
        // Below min quantity
        assert!(!r.meets_minimums(dec!(100000), dec!(0.0001)));
    }
}
