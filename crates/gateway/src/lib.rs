//! Arachne Gateway
//!
//! The exchange gateway port: everything the engine needs from an exchange,
//! and nothing about how any particular exchange speaks on the wire.
//! Transport, reconnects and authentication live behind implementations of
//! [`ExchangeGateway`].

pub mod error;
pub mod gateway;
pub mod messages;
pub mod retry;

pub use error::GatewayError;
pub use gateway::ExchangeGateway;
pub use messages::account::{AccountBalance, MarginAction, MarginType};
pub use messages::order::{OrderRequest, OrderStatus, OrderType, OrderUpdate, TimeInForce};
pub use retry::{RetryPolicy, with_retry};
