//! Error taxonomy for gateway operations
//!
//! The engine never matches on raw exchange codes; implementations map wire
//! errors into these variants and the classification predicates drive
//! policy: transient errors are retried, expected rejections are no-ops for
//! one leg, the duplicate race is resolved by adoption, everything else is
//! structural and flattens the session.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    // -- transient -------------------------------------------------------
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request timestamp outside the exchange recv window: {0}")]
    TimestampSkew(String),

    #[error("transport failure: {0}")]
    Transport(String),

    // -- expected rejections ---------------------------------------------
    #[error("reduce-only order rejected")]
    ReduceOnlyRejected,

    #[error("leverage or margin insufficient for the requested order")]
    InsufficientMargin,

    #[error("stop order would trigger immediately")]
    WouldTriggerImmediately,

    #[error("position margin already at the requested value")]
    MarginUnchanged,

    // -- duplicate-submission race ---------------------------------------
    #[error("order already exists")]
    DuplicateOrder,

    // -- structural ------------------------------------------------------
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("order {0} not found")]
    OrderNotFound(u64),

    #[error("fill stream closed")]
    StreamClosed,

    #[error("exchange error {code}: {message}")]
    Exchange { code: i32, message: String },
}

impl GatewayError {
    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::TimestampSkew(_) | Self::Transport(_)
        )
    }

    /// A rejection the engine treats as a no-op for the affected leg
    pub fn is_expected_rejection(&self) -> bool {
        matches!(
            self,
            Self::ReduceOnlyRejected
                | Self::InsufficientMargin
                | Self::WouldTriggerImmediately
                | Self::MarginUnchanged
        )
    }

    /// The duplicate-submission race; resolved by re-querying open orders
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateOrder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_is_disjoint() {
        let all = [
            GatewayError::RateLimited("1200 weight".into()),
            GatewayError::TimestampSkew("ahead of server".into()),
            GatewayError::Transport("connection reset".into()),
            GatewayError::ReduceOnlyRejected,
            GatewayError::InsufficientMargin,
            GatewayError::WouldTriggerImmediately,
            GatewayError::MarginUnchanged,
            GatewayError::DuplicateOrder,
            GatewayError::UnknownSymbol("NOPEUSDT".into()),
            GatewayError::OrderNotFound(7),
            GatewayError::StreamClosed,
            GatewayError::Exchange {
                code: -4131,
                message: "counterparty quality".into(),
            },
        ];

        for e in &all {
            let classes = [e.is_transient(), e.is_expected_rejection(), e.is_duplicate()];
            assert!(
                classes.iter().filter(|c| **c).count() <= 1,
                "{e} falls into more than one class"
            );
        }
    }

    #[test]
    fn test_structural_errors_have_no_class() {
        let e = GatewayError::UnknownSymbol("NOPEUSDT".into());
        assert!(!e.is_transient() && !e.is_expected_rejection() && !e.is_duplicate());
    }
}
