//! Account and margin message types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Margin mode for a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginType {
    /// Collateral assigned exclusively to one position
    Isolated,
    /// All positions share the account margin pool
    Cross,
}

impl MarginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Isolated => "isolated",
            Self::Cross => "cross",
        }
    }
}

/// Direction of a position-margin adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginAction {
    Add,
    Reduce,
}

/// Quote-asset balance split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Quote asset (e.g. "USDT")
    pub asset: String,
    /// Balance available for new orders and margin
    pub free: Decimal,
    /// Balance locked by open orders
    pub locked: Decimal,
}

impl AccountBalance {
    pub fn new(asset: impl Into<String>, free: Decimal, locked: Decimal) -> Self {
        Self {
            asset: asset.into(),
            free,
            locked,
        }
    }
}
