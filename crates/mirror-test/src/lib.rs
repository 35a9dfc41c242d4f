//! Replica Mirror Test Harness - Simulation and invariant checking
//!
//! This crate provides:
//! - An in-memory host that echoes every mutation as an event
//! - A harness driving the engine to quiescence
//! - Invariant and convergence checks
//! - Seeded workspace fuzzing
//! - Canned scenarios and end-to-end router runs

pub mod sim_host;
pub mod harness;
pub mod fuzzer;
pub mod scenarios;
mod integration;

pub use sim_host::*;
pub use harness::*;
pub use fuzzer::*;
pub use scenarios::*;
