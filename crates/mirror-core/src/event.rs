//! Host lifecycle events
//!
//! The host delivers one event per occurrence, including occurrences caused
//! by the engine's own commands.

use crate::{Replica, ReplicaId, Window, WindowId};

/// Event type classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    ReplicaCreated,
    ReplicaRemoved,
    ReplicaUpdated,
    ReplicaMoved,
    FocusChanged,
    WindowOpened,
    WindowClosed,
    ProcessStarted,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::ReplicaCreated => "replica_created",
            EventKind::ReplicaRemoved => "replica_removed",
            EventKind::ReplicaUpdated => "replica_updated",
            EventKind::ReplicaMoved => "replica_moved",
            EventKind::FocusChanged => "focus_changed",
            EventKind::WindowOpened => "window_opened",
            EventKind::WindowClosed => "window_closed",
            EventKind::ProcessStarted => "process_started",
        }
    }
}

/// A lifecycle event delivered by the host
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostEvent {
    ReplicaCreated(Replica),
    ReplicaRemoved {
        replica: ReplicaId,
        window: WindowId,
        /// Set when the replica goes away as part of a window teardown
        window_closing: bool,
    },
    ReplicaUpdated {
        replica_id: ReplicaId,
        /// New URI, present only when the content identity changed
        changed_uri: Option<String>,
        replica: Replica,
    },
    ReplicaMoved {
        replica: ReplicaId,
        window: WindowId,
        to_index: u32,
    },
    FocusChanged {
        replica: ReplicaId,
        window: WindowId,
    },
    WindowOpened(Window),
    WindowClosed(WindowId),
    ProcessStarted,
}

impl HostEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            HostEvent::ReplicaCreated(_) => EventKind::ReplicaCreated,
            HostEvent::ReplicaRemoved { .. } => EventKind::ReplicaRemoved,
            HostEvent::ReplicaUpdated { .. } => EventKind::ReplicaUpdated,
            HostEvent::ReplicaMoved { .. } => EventKind::ReplicaMoved,
            HostEvent::FocusChanged { .. } => EventKind::FocusChanged,
            HostEvent::WindowOpened(_) => EventKind::WindowOpened,
            HostEvent::WindowClosed(_) => EventKind::WindowClosed,
            HostEvent::ProcessStarted => EventKind::ProcessStarted,
        }
    }

    /// The replica this event is about, if any
    pub fn replica(&self) -> Option<ReplicaId> {
        match self {
            HostEvent::ReplicaCreated(replica) => Some(replica.id),
            HostEvent::ReplicaRemoved { replica, .. }
            | HostEvent::ReplicaMoved { replica, .. }
            | HostEvent::FocusChanged { replica, .. } => Some(*replica),
            HostEvent::ReplicaUpdated { replica_id, .. } => Some(*replica_id),
            HostEvent::WindowOpened(_) | HostEvent::WindowClosed(_) | HostEvent::ProcessStarted => {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_and_replica() {
        let event = HostEvent::ReplicaRemoved {
            replica: ReplicaId::new(4),
            window: WindowId::new(1),
            window_closing: false,
        };
        assert_eq!(event.kind(), EventKind::ReplicaRemoved);
        assert_eq!(event.replica(), Some(ReplicaId::new(4)));

        let event = HostEvent::WindowClosed(WindowId::new(1));
        assert_eq!(event.kind().name(), "window_closed");
        assert_eq!(event.replica(), None);
    }
}
