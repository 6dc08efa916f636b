//! Arachne Exchange Simulator
//!
//! A scriptable in-memory exchange implementing the gateway contract.
//! Engine tests drive it: move the price, trigger fills, inject errors
//! from every taxonomy class, then assert on what the engine did.

mod exchange;

pub use exchange::SimExchange;
