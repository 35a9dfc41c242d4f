//! Replica Mirror Core - Fundamental types and the host boundary
//!
//! This crate defines the types shared by every layer of the mirror engine:
//! - Identifiers (WindowId, ReplicaId, EntityId, SpaceId)
//! - Host records (Replica, Window)
//! - Lifecycle events delivered by the host
//! - The host command interface
//! - Managed-content policy and error types

pub mod id;
pub mod host;
pub mod event;
pub mod policy;
pub mod error;

pub use id::*;
pub use host::*;
pub use event::*;
pub use policy::*;
pub use error::*;
