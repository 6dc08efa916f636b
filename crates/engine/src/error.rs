//! Engine error types

use arachne_core::{LadderError, ProgressionError, RulesError};
use arachne_gateway::GatewayError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Initial position sizing failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SizingError {
    #[error("sizing infeasible: {0}")]
    Infeasible(String),

    #[error("buy price {buy} and end price {end} do not form a valid range")]
    InvalidRange { buy: Decimal, end: Decimal },

    #[error(transparent)]
    Progression(#[from] ProgressionError),
}

/// Fatal session errors
///
/// Every path that surfaces one of these cancels outstanding orders before
/// the session terminates.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    #[error("sizing: {0}")]
    Sizing(#[from] SizingError),

    #[error("progression: {0}")]
    Progression(#[from] ProgressionError),

    #[error("ladder: {0}")]
    Ladder(#[from] LadderError),

    #[error("symbol rules: {0}")]
    Rules(#[from] RulesError),

    #[error("configuration: {0}")]
    Config(String),
}
