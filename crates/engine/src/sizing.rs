//! Initial position sizing
//!
//! Finds the largest starting quantity whose projected ladder fits the
//! leveraged budget. Prices always step by a constant percent, so the rung
//! count between the entry and the end price is fixed by geometry; only the
//! quantity at each rung varies with the candidate. The search runs over
//! whole quantity steps so every candidate is already exchange-valid.

use arachne_core::{Progression, ProgressionFamily, SymbolRules};
use log::{debug, info};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::config::SessionConfig;
use crate::error::SizingError;

/// Result of initial sizing
#[derive(Debug, Clone, PartialEq)]
pub struct InitialPosition {
    /// Quantity of the entry order, rounded to the quantity step
    pub quantity: Decimal,
    /// Number of rungs between entry and end price
    pub steps: u32,
    /// Cumulative notional of the projected ladder
    pub notional: Decimal,
}

/// Size the entry quantity for a ladder from `buy_price` to `end_price`
///
/// Fails with [`SizingError::Infeasible`] when the price geometry cannot
/// host `min_steps` rungs or no candidate quantity satisfies the budget
/// and exchange minimums.
pub fn calculate_initial_position(
    config: &SessionConfig,
    rules: &SymbolRules,
    progression: &Progression,
    buy_price: Decimal,
    end_price: Decimal,
) -> Result<InitialPosition, SizingError> {
    if buy_price <= Decimal::ZERO || end_price <= buy_price {
        return Err(SizingError::InvalidRange {
            buy: buy_price,
            end: end_price,
        });
    }

    // Rung count is fixed by the constant-percent price geometry
    let second = rules.price_up(buy_price, config.delta_price);
    let steps = Progression::new(ProgressionFamily::Geometric)
        .find_length(buy_price, second, end_price)?;
    if steps < config.min_steps {
        return Err(SizingError::Infeasible(format!(
            "price geometry from {} to {} holds {} rungs, {} required",
            buy_price, end_price, steps, config.min_steps
        )));
    }

    let ceiling = config.notional_ceiling();

    // Candidate quantities are whole multiples of the quantity step; the
    // ladder value grows monotonically with the candidate, so the largest
    // feasible multiple is found by binary search over step counts.
    let lo = quantity_steps(rules, smallest_candidate(rules, buy_price));
    let hi = quantity_steps(rules, ceiling / buy_price);
    if lo > hi || lo == 0 {
        return Err(SizingError::Infeasible(format!(
            "budget {} cannot host the exchange minimum order at price {}",
            config.limit_on_position, buy_price
        )));
    }
    debug!(
        "[SIZING] {} searching {}..{} quantity steps over {} rungs",
        rules.symbol, lo, hi, steps
    );

    let value_of = |k: u64| -> Result<Option<Decimal>, SizingError> {
        let quantity = Decimal::from(k) * rules.quantity_step;
        ladder_value(config, rules, progression, buy_price, quantity, steps)
    };

    if value_of(lo)?.is_none() {
        return Err(SizingError::Infeasible(format!(
            "smallest valid quantity already exceeds budget {} x leverage {}",
            config.limit_on_position, config.leverage
        )));
    }

    let (mut lo, mut hi) = (lo, hi);
    while lo < hi {
        let mid = lo + (hi - lo).div_ceil(2);
        if value_of(mid)?.is_some() {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }

    let quantity = Decimal::from(lo) * rules.quantity_step;
    let notional = value_of(lo)?.unwrap_or(Decimal::ZERO);
    info!(
        "[SIZING] {} initial quantity {} over {} rungs, projected notional {} (ceiling {})",
        rules.symbol, quantity, steps, notional, ceiling
    );
    Ok(InitialPosition {
        quantity,
        steps,
        notional,
    })
}

/// Projected cumulative notional of a ladder starting at `quantity`
///
/// `None` means the candidate violates the budget, the per-rung ceiling or
/// the exchange minimums; the caller treats it as "too large" (or, for the
/// smallest candidate, as infeasible).
fn ladder_value(
    config: &SessionConfig,
    rules: &SymbolRules,
    progression: &Progression,
    buy_price: Decimal,
    quantity: Decimal,
    steps: u32,
) -> Result<Option<Decimal>, SizingError> {
    let quantity = rules.round_quantity(quantity);
    if !rules.meets_minimums(buy_price, quantity) {
        return Ok(None);
    }

    // Family step between adjacent rung quantities
    let grown = quantity * (Decimal::ONE + config.delta_quantity);
    let qty_step = progression.delta(quantity, grown)?;

    let ceiling = config.notional_ceiling();
    let rung_ceiling = config.rung_ceiling();
    let mut total = Decimal::ZERO;
    let mut price = buy_price;
    for rung in 1..=steps {
        let projected = progression.nth_term(quantity, qty_step, rung)?;
        let rung_qty = rules.round_quantity(projected);
        let rung_notional = rung_qty * price;
        if rung_notional > rung_ceiling {
            return Ok(None);
        }
        total += rung_notional;
        if total > ceiling {
            return Ok(None);
        }
        price = rules.price_up(price, config.delta_price);
    }
    Ok(Some(total))
}

/// Smallest quantity worth considering: exchange minimums at the entry price
fn smallest_candidate(rules: &SymbolRules, buy_price: Decimal) -> Decimal {
    let by_notional = rules.min_notional / buy_price;
    let floor = by_notional.max(rules.min_quantity);
    // Round up to the next whole step so the candidate stays above both
    let stepped = rules.round_quantity(floor);
    if stepped < floor {
        stepped + rules.quantity_step
    } else {
        stepped
    }
}

fn quantity_steps(rules: &SymbolRules, quantity: Decimal) -> u64 {
    (quantity / rules.quantity_step)
        .floor()
        .to_u64()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rules() -> SymbolRules {
        SymbolRules::new("BTCUSDT", dec!(0.01), dec!(0.001), dec!(0.001), dec!(5)).unwrap()
    }

    fn config() -> SessionConfig {
        SessionConfig {
            limit_on_position: dec!(1000),
            limit_on_transaction: dec!(0.25),
            delta_price: dec!(0.02),
            delta_quantity: dec!(0.05),
            min_steps: 5,
            leverage: 10,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_sizing_fits_budget_and_min_steps() {
        let config = config();
        let progression = Progression::new(ProgressionFamily::Geometric);

        let sized =
            calculate_initial_position(&config, &rules(), &progression, dec!(100), dec!(110))
                .unwrap();

        assert!(sized.steps >= 5);
        assert!(sized.notional <= dec!(10000));
        assert!(sized.quantity > Decimal::ZERO);
    }

    #[test]
    fn test_binary_search_returns_maximal_quantity() {
        let config = config();
        let r = rules();
        let progression = Progression::new(ProgressionFamily::Geometric);

        let sized =
            calculate_initial_position(&config, &r, &progression, dec!(100), dec!(110)).unwrap();

        // One quantity step more must break a constraint
        let bumped = sized.quantity + r.quantity_step;
        let value =
            ladder_value(&config, &r, &progression, dec!(100), bumped, sized.steps).unwrap();
        assert!(value.is_none(), "a larger candidate should be infeasible");
    }

    #[test]
    fn test_every_candidate_is_step_aligned() {
        let config = config();
        let r = rules();
        let progression = Progression::new(ProgressionFamily::Geometric);

        let sized =
            calculate_initial_position(&config, &r, &progression, dec!(100), dec!(110)).unwrap();

        assert_eq!(r.round_quantity(sized.quantity), sized.quantity);
    }

    #[test]
    fn test_min_steps_violation_is_infeasible() {
        let config = SessionConfig {
            min_steps: 50,
            ..config()
        };
        let progression = Progression::new(ProgressionFamily::Geometric);

        let err =
            calculate_initial_position(&config, &rules(), &progression, dec!(100), dec!(110))
                .unwrap_err();
        assert!(matches!(err, SizingError::Infeasible(_)));
    }

    #[test]
    fn test_tiny_budget_is_infeasible() {
        let config = SessionConfig {
            limit_on_position: dec!(0.50),
            ..config()
        };
        let progression = Progression::new(ProgressionFamily::Geometric);

        let err =
            calculate_initial_position(&config, &rules(), &progression, dec!(100), dec!(110))
                .unwrap_err();
        assert!(matches!(err, SizingError::Infeasible(_)));
    }

    #[test]
    fn test_invalid_range_rejected() {
        let progression = Progression::new(ProgressionFamily::Geometric);
        let err =
            calculate_initial_position(&config(), &rules(), &progression, dec!(110), dec!(100))
                .unwrap_err();
        assert!(matches!(err, SizingError::InvalidRange { .. }));
    }

    #[test]
    fn test_arithmetic_family_sizes_too() {
        let progression = Progression::new(ProgressionFamily::Arithmetic);
        let sized =
            calculate_initial_position(&config(), &rules(), &progression, dec!(100), dec!(110))
                .unwrap();
        assert!(sized.notional <= dec!(10000));
    }
}
