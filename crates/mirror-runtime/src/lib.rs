//! Replica Mirror Runtime - Event routing and the reconciliation loop
//!
//! This crate runs the engine as a single actor:
//! 1. Host events are queued on one inbound channel
//! 2. Each event is reconciled to completion before the next is received
//! 3. Expired suppression tokens are swept on a timer
//! 4. Snapshot and stats queries are answered between events

pub mod config;
pub mod node;
pub mod telemetry;

pub use config::*;
pub use node::*;
pub use telemetry::*;
