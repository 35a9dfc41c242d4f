//! Replica Mirror State Engine - Workspace reconciliation
//!
//! This crate implements the reconciliation engine:
//! - Workspace model (entities, reverse index)
//! - Transactional workspace store over a key-value backend
//! - Suppression of self-issued command echoes
//! - Reconciliation operations and ensure-mirrors
//! - Startup rebuild from live replicas

pub mod workspace;
pub mod store;
pub mod guard;
pub mod reconcile;
pub mod rebuild;

pub use workspace::*;
pub use store::*;
pub use guard::*;
pub use reconcile::*;
pub use rebuild::*;
