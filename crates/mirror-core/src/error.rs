//! Error types for the mirror engine

use thiserror::Error;

use crate::{ReplicaId, WindowId};

/// Core mirror errors
#[derive(Error, Debug)]
pub enum MirrorError {
    // Host errors
    #[error("Host command {op} failed: {reason}")]
    Host { op: &'static str, reason: String },

    #[error("Replica not found: {0:?}")]
    ReplicaNotFound(ReplicaId),

    #[error("Window not found: {0:?}")]
    WindowNotFound(WindowId),

    // Store errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Stale transaction: loaded version {expected}, store has {found}")]
    StaleTransaction { expected: u64, found: u64 },

    // Router errors
    #[error("Router channel closed")]
    ChannelClosed,

    #[error("Router queue full")]
    QueueFull,
}

impl MirrorError {
    pub fn host(op: &'static str, reason: impl Into<String>) -> Self {
        MirrorError::Host {
            op,
            reason: reason.into(),
        }
    }

    /// Transient host errors are expected while windows close mid-flight
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MirrorError::Host { .. }
                | MirrorError::ReplicaNotFound(_)
                | MirrorError::WindowNotFound(_)
        )
    }
}

/// Result type for mirror operations
pub type MirrorResult<T> = Result<T, MirrorError>;
