//! Error types for the core domain crate

use rust_decimal::Decimal;
use thiserror::Error;

/// Progression engine errors
///
/// Every numeric edge case surfaces as a descriptive variant; the engine
/// never produces NaN/Inf or silently degenerate sequences.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProgressionError {
    #[error("ratio must be positive for a {family} progression, got {ratio}")]
    NonPositiveRatio { family: &'static str, ratio: Decimal },

    #[error("step is zero, the progression cannot move from {first} to {last}")]
    ZeroStep { first: Decimal, last: Decimal },

    #[error("term index must be at least 1")]
    ZeroIndex,

    #[error("{first} and {last} lie in opposite directions given step {step}")]
    DirectionMismatch {
        first: Decimal,
        last: Decimal,
        step: Decimal,
    },

    #[error("{value} is outside the domain of a {family} progression ({constraint})")]
    Domain {
        family: &'static str,
        value: Decimal,
        constraint: &'static str,
    },

    #[error("division by zero deriving a {family} progression from {first}")]
    DivisionByZero { family: &'static str, first: Decimal },

    #[error("arithmetic overflow evaluating a {family} progression")]
    Overflow { family: &'static str },
}

/// Symbol trading-rule errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RulesError {
    #[error("tick size must be positive, got {0}")]
    InvalidTickSize(Decimal),

    #[error("quantity step must be positive, got {0}")]
    InvalidQuantityStep(Decimal),

    #[error("minimum notional must not be negative, got {0}")]
    InvalidMinNotional(Decimal),
}

/// Price ladder errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LadderError {
    #[error("a level already exists at price {0}")]
    Occupied(Decimal),

    #[error("level price must be positive, got {0}")]
    InvalidPrice(Decimal),
}
