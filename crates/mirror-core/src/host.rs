//! Host records and the host command interface
//!
//! The host owns windows and replicas. The engine only sees them through
//! these records and drives them through [`Host`] commands.

use async_trait::async_trait;

use crate::{MirrorResult, ReplicaId, SpaceId, WindowId};

/// Window type as reported by the host
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum WindowKind {
    #[default]
    Normal,
    Popup,
    Panel,
    DevTools,
}

/// A host window
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Window {
    pub id: WindowId,
    pub kind: WindowKind,
    /// Private (incognito) windows are never mirrored
    pub private: bool,
}

impl Window {
    pub fn normal(id: WindowId) -> Self {
        Window {
            id,
            kind: WindowKind::Normal,
            private: false,
        }
    }

    /// Whether replicas in this window take part in mirroring
    #[inline]
    pub fn is_mirrorable(&self) -> bool {
        !self.private && self.kind == WindowKind::Normal
    }
}

/// A physical replica as reported by the host
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Replica {
    pub id: ReplicaId,
    pub window: WindowId,
    /// Position within the window
    pub index: u32,
    pub uri: String,
    pub space: SpaceId,
    pub pinned: bool,
    pub private: bool,
    /// Currently selected replica of its window
    pub active: bool,
}

impl Replica {
    pub fn new(id: ReplicaId, window: WindowId, uri: impl Into<String>) -> Self {
        Replica {
            id,
            window,
            index: 0,
            uri: uri.into(),
            space: SpaceId::default(),
            pinned: false,
            private: false,
            active: false,
        }
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }

    pub fn with_space(mut self, space: SpaceId) -> Self {
        self.space = space;
        self
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    pub fn active(mut self) -> Self {
        self.active = true;
        self
    }
}

/// Options for replica creation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Mirrors are always created in the background
    pub focused: bool,
    /// Target position; host appends when absent
    pub index: Option<u32>,
}

impl CreateOptions {
    pub fn background() -> Self {
        CreateOptions::default()
    }
}

/// Commands the engine issues to the host.
///
/// Every command may fail, e.g. when the target window closes mid-flight.
/// The engine treats failures as best-effort no-ops.
#[async_trait]
pub trait Host: Send + Sync {
    async fn create_replica(
        &self,
        window: WindowId,
        uri: &str,
        space: &SpaceId,
        options: CreateOptions,
    ) -> MirrorResult<Replica>;

    async fn remove_replica(&self, replica: ReplicaId) -> MirrorResult<()>;

    async fn update_replica(&self, replica: ReplicaId, uri: &str) -> MirrorResult<()>;

    async fn move_replica(&self, replica: ReplicaId, index: u32) -> MirrorResult<()>;

    async fn focus_replica(&self, replica: ReplicaId) -> MirrorResult<()>;

    async fn get_replica(&self, replica: ReplicaId) -> MirrorResult<Replica>;

    /// All windows; callers filter with [`Window::is_mirrorable`]
    async fn list_windows(&self) -> MirrorResult<Vec<Window>>;

    async fn list_replicas(&self, window: WindowId) -> MirrorResult<Vec<Replica>>;
}

#[async_trait]
impl<H: Host + ?Sized> Host for std::sync::Arc<H> {
    async fn create_replica(
        &self,
        window: WindowId,
        uri: &str,
        space: &SpaceId,
        options: CreateOptions,
    ) -> MirrorResult<Replica> {
        (**self).create_replica(window, uri, space, options).await
    }

    async fn remove_replica(&self, replica: ReplicaId) -> MirrorResult<()> {
        (**self).remove_replica(replica).await
    }

    async fn update_replica(&self, replica: ReplicaId, uri: &str) -> MirrorResult<()> {
        (**self).update_replica(replica, uri).await
    }

    async fn move_replica(&self, replica: ReplicaId, index: u32) -> MirrorResult<()> {
        (**self).move_replica(replica, index).await
    }

    async fn focus_replica(&self, replica: ReplicaId) -> MirrorResult<()> {
        (**self).focus_replica(replica).await
    }

    async fn get_replica(&self, replica: ReplicaId) -> MirrorResult<Replica> {
        (**self).get_replica(replica).await
    }

    async fn list_windows(&self) -> MirrorResult<Vec<Window>> {
        (**self).list_windows().await
    }

    async fn list_replicas(&self, window: WindowId) -> MirrorResult<Vec<Replica>> {
        (**self).list_replicas(window).await
    }
}
