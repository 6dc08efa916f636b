//! Arachne Core Domain
//!
//! Pure domain types for the Arachne grid engine.
//! This crate contains no async, no I/O, and is 100% unit testable.

pub mod error;
pub mod ladder;
pub mod level;
pub mod position;
pub mod progression;
pub mod rules;

// Re-export commonly used types at crate root
pub use error::{LadderError, ProgressionError, RulesError};
pub use ladder::Ladder;
pub use level::{Level, OrderId, Side};
pub use position::PositionRisk;
pub use progression::{Progression, ProgressionFamily};
pub use rules::SymbolRules;
