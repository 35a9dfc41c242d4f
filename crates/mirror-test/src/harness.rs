//! Reconciliation harness
//!
//! Drives a [`Reconciler`] against a [`SimulatedHost`], feeding it host
//! events until the host goes quiet.

use std::collections::HashMap;
use std::sync::Arc;

use mirror_core::{EventKind, Host, HostEvent, ReplicaId, WindowId};
use mirror_state::{EventOutcome, MemoryStore, Reconciler, ReconcilerConfig, Snapshot};

use crate::SimulatedHost;

/// Upper bound on events processed by one [`Harness::settle`] call
pub const SETTLE_LIMIT: usize = 10_000;

/// One processed event and what the engine made of it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Processed {
    pub kind: EventKind,
    pub replica: Option<ReplicaId>,
    pub outcome: EventOutcome,
}

/// Engine wired to a simulated host and an in-memory store
pub struct Harness {
    pub host: Arc<SimulatedHost>,
    pub engine: Reconciler<Arc<SimulatedHost>, Arc<MemoryStore>>,
    pub store: Arc<MemoryStore>,
    log: Vec<Processed>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ReconcilerConfig::default())
    }

    pub fn with_config(config: ReconcilerConfig) -> Self {
        let host = Arc::new(SimulatedHost::new());
        let store = Arc::new(MemoryStore::new());
        let engine = Reconciler::with_config(host.clone(), store.clone(), config);
        Harness {
            host,
            engine,
            store,
            log: Vec::new(),
        }
    }

    /// Deliver process start and settle
    pub async fn start(&mut self) -> usize {
        self.host.discard_events();
        self.dispatch(HostEvent::ProcessStarted).await;
        self.settle().await + 1
    }

    pub async fn dispatch(&mut self, event: HostEvent) -> EventOutcome {
        let kind = event.kind();
        let replica = event.replica();
        let outcome = self.engine.handle(event).await;
        self.log.push(Processed {
            kind,
            replica,
            outcome,
        });
        outcome
    }

    /// Process queued host events until none are left; returns the count.
    ///
    /// Panics after [`SETTLE_LIMIT`] events, which means commands are
    /// feeding back into the engine without end.
    pub async fn settle(&mut self) -> usize {
        let mut processed = 0;
        while let Some(event) = self.host.next_event() {
            self.dispatch(event).await;
            processed += 1;
            assert!(processed < SETTLE_LIMIT, "event loop did not settle");
        }
        processed
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.engine
            .snapshot()
            .await
            .unwrap_or_default()
    }

    /// Events processed so far
    pub fn processed(&self) -> &[Processed] {
        &self.log
    }

    pub fn clear_processed(&mut self) {
        self.log.clear();
    }

    pub fn count(&self, kind: EventKind, outcome: EventOutcome) -> usize {
        self.log
            .iter()
            .filter(|p| p.kind == kind && p.outcome == outcome)
            .count()
    }

    /// Check workspace invariants against each other and against the host
    pub async fn check(&self) -> Result<(), String> {
        let snapshot = self.snapshot().await;
        snapshot.check_invariants()?;
        check_against_host(&snapshot, &self.host)
    }

    /// Check that every entity has one replica with its canonical URI in
    /// every mirrorable window
    pub async fn check_converged(&self) -> Result<(), String> {
        let snapshot = self.snapshot().await;
        let windows = mirrorable_windows(&self.host).await;
        for entity in snapshot.entities() {
            for window in &windows {
                let Some(replica) = entity.replica_in(*window) else {
                    return Err(format!("entity {} missing from {}", entity.id, window));
                };
                match self.host.replica(replica) {
                    Some(r) if r.uri == entity.canonical_uri => {}
                    Some(r) => {
                        return Err(format!(
                            "replica {} shows {} but entity {} is at {}",
                            replica, r.uri, entity.id, entity.canonical_uri
                        ))
                    }
                    None => return Err(format!("replica {} does not exist", replica)),
                }
            }
        }
        Ok(())
    }

    /// Entity-to-window layout, keyed by canonical URI
    pub async fn layout(&self) -> HashMap<String, Vec<WindowId>> {
        self.snapshot()
            .await
            .entities()
            .map(|e| (e.canonical_uri.clone(), e.replicas.keys().copied().collect()))
            .collect()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

async fn mirrorable_windows(host: &SimulatedHost) -> Vec<WindowId> {
    host.list_windows()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|w| w.is_mirrorable())
        .map(|w| w.id)
        .collect()
}

/// Every mapped replica must exist in the window it is mapped under
pub fn check_against_host(snapshot: &Snapshot, host: &SimulatedHost) -> Result<(), String> {
    for entity in snapshot.entities() {
        for (window, replica) in &entity.replicas {
            match host.replica(*replica) {
                Some(r) if r.window == *window => {}
                Some(r) => {
                    return Err(format!(
                        "replica {} mapped under {} lives in {}",
                        replica, window, r.window
                    ))
                }
                None => {
                    return Err(format!(
                        "entity {} maps {} to missing replica {}",
                        entity.id, window, replica
                    ))
                }
            }
        }
    }
    Ok(())
}
