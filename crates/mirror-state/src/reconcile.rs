//! Reconciliation pipeline
//!
//! Each host event is mapped to one operation that reads the workspace inside
//! a transaction, issues the compensating host commands, and commits. Nothing
//! escapes [`Reconciler::handle`]: failures become [`EventOutcome::Failed`].

use std::time::Instant;

use mirror_core::{
    CreateOptions, EntityId, Host, HostEvent, ManagedPolicy, MirrorError, MirrorResult, Replica,
    ReplicaId, SpaceId, Window, WindowId,
};
use tracing::{debug, warn};

use crate::{
    GuardConfig, KeyValueStore, Snapshot, SuppressionClass, SuppressionGuard, SuppressionToken,
    WorkspaceStore,
};

/// Reconciler configuration
#[derive(Clone, Debug, Default)]
pub struct ReconcilerConfig {
    pub policy: ManagedPolicy,
    pub guard: GuardConfig,
}

/// Result of handling one host event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    /// State was reconciled
    Applied,
    /// Echo of an engine-issued command
    Suppressed,
    /// Not relevant to the workspace
    Ignored,
    /// An internal error was swallowed
    Failed,
}

/// Reconciliation counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub applied: u64,
    pub suppressed: u64,
    pub ignored: u64,
    pub failed: u64,
    pub commands_issued: u64,
    pub commands_failed: u64,
    pub entities_created: u64,
    pub entities_pruned: u64,
}

impl ReconcileStats {
    fn record(&mut self, outcome: EventOutcome) {
        match outcome {
            EventOutcome::Applied => self.applied += 1,
            EventOutcome::Suppressed => self.suppressed += 1,
            EventOutcome::Ignored => self.ignored += 1,
            EventOutcome::Failed => self.failed += 1,
        }
    }
}

/// The reconciliation engine
pub struct Reconciler<H, S> {
    pub(crate) host: H,
    pub(crate) store: WorkspaceStore<S>,
    pub(crate) guard: SuppressionGuard,
    pub(crate) policy: ManagedPolicy,
    pub(crate) stats: ReconcileStats,
}

impl<H: Host, S: KeyValueStore> Reconciler<H, S> {
    pub fn new(host: H, store: S) -> Self {
        Self::with_config(host, store, ReconcilerConfig::default())
    }

    pub fn with_config(host: H, store: S, config: ReconcilerConfig) -> Self {
        Reconciler {
            host,
            store: WorkspaceStore::new(store),
            guard: SuppressionGuard::with_config(config.guard),
            policy: config.policy,
            stats: ReconcileStats::default(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn store(&self) -> &WorkspaceStore<S> {
        &self.store
    }

    pub fn guard(&self) -> &SuppressionGuard {
        &self.guard
    }

    pub fn guard_mut(&mut self) -> &mut SuppressionGuard {
        &mut self.guard
    }

    pub fn policy(&self) -> &ManagedPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &ReconcileStats {
        &self.stats
    }

    /// Current persisted workspace
    pub async fn snapshot(&self) -> MirrorResult<Snapshot> {
        self.store.load().await
    }

    /// Process one host event
    pub async fn handle(&mut self, event: HostEvent) -> EventOutcome {
        let kind = event.kind();
        let target = event.replica();

        let result = match event {
            HostEvent::ReplicaCreated(replica) => self.on_replica_created(replica).await,
            HostEvent::ReplicaRemoved {
                replica,
                window,
                window_closing,
            } => self.on_replica_removed(replica, window, window_closing).await,
            HostEvent::ReplicaUpdated {
                replica_id,
                changed_uri,
                replica,
            } => self.on_replica_updated(replica_id, changed_uri, replica).await,
            HostEvent::ReplicaMoved {
                replica, to_index, ..
            } => self.on_replica_moved(replica, to_index).await,
            HostEvent::FocusChanged { replica, .. } => self.on_focus_changed(replica).await,
            HostEvent::WindowOpened(window) => self.on_window_opened(window).await,
            HostEvent::WindowClosed(window) => self.on_window_closed(window).await,
            HostEvent::ProcessStarted => self.rebuild().await.map(|_| EventOutcome::Applied),
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(event = kind.name(), replica = ?target, error = %e, "reconciliation failed");
                EventOutcome::Failed
            }
        };
        self.stats.record(outcome);
        debug!(event = kind.name(), replica = ?target, ?outcome, "event handled");
        outcome
    }

    async fn on_replica_created(&mut self, replica: Replica) -> MirrorResult<EventOutcome> {
        if self
            .guard
            .consume(SuppressionClass::Creation, replica.id, Instant::now())
        {
            return Ok(EventOutcome::Suppressed);
        }
        if !self.policy.is_managed(&replica) {
            return Ok(EventOutcome::Ignored);
        }

        let live = self.live_windows().await?;
        if !live.contains(&replica.window) {
            return Ok(EventOutcome::Ignored);
        }

        let mut txn = self.store.begin().await?;
        let entity = self.resolve_or_attach(&mut txn.snapshot, &replica);
        self.ensure_mirrors(&mut txn.snapshot, entity, &live).await;
        self.store.commit(txn).await?;
        Ok(EventOutcome::Applied)
    }

    async fn on_replica_removed(
        &mut self,
        replica: ReplicaId,
        window: WindowId,
        window_closing: bool,
    ) -> MirrorResult<EventOutcome> {
        let suppressed = self
            .guard
            .consume(SuppressionClass::Removal, replica, Instant::now());
        if window_closing {
            // The window-closed event drops the mappings
            return Ok(EventOutcome::Ignored);
        }

        let mut txn = self.store.begin().await?;
        let outcome = match txn.snapshot.entity_of(replica) {
            None if suppressed => EventOutcome::Suppressed,
            None => EventOutcome::Ignored,
            Some(entity) => {
                txn.snapshot.detach_replica(replica);
                if !suppressed {
                    let siblings = txn
                        .snapshot
                        .entity(entity)
                        .map(|e| e.siblings(replica))
                        .unwrap_or_default();
                    debug!(replica = %replica, %window, entity = %entity, siblings = siblings.len(), "closing mirrors");
                    for sibling in siblings {
                        self.remove_sibling(sibling).await;
                        txn.snapshot.detach_replica(sibling);
                    }
                }
                if txn.snapshot.prune(entity) {
                    self.stats.entities_pruned += 1;
                }
                if suppressed {
                    EventOutcome::Suppressed
                } else {
                    EventOutcome::Applied
                }
            }
        };
        self.store.commit(txn).await?;
        Ok(outcome)
    }

    async fn on_replica_updated(
        &mut self,
        replica_id: ReplicaId,
        changed_uri: Option<String>,
        mut replica: Replica,
    ) -> MirrorResult<EventOutcome> {
        let Some(uri) = changed_uri else {
            return Ok(EventOutcome::Ignored);
        };
        if self
            .guard
            .consume(SuppressionClass::Update, replica_id, Instant::now())
        {
            return Ok(EventOutcome::Suppressed);
        }
        replica.id = replica_id;
        replica.uri = uri;
        if !self.policy.is_managed(&replica) {
            return Ok(EventOutcome::Ignored);
        }

        let live = self.live_windows().await?;
        if !live.contains(&replica.window) {
            return Ok(EventOutcome::Ignored);
        }

        let mut txn = self.store.begin().await?;
        let entity = self.resolve_or_attach(&mut txn.snapshot, &replica);
        let siblings = match txn.snapshot.entity_mut(entity) {
            Some(e) => {
                e.canonical_uri = replica.uri.clone();
                e.siblings(replica_id)
            }
            None => Vec::new(),
        };

        for sibling in siblings {
            match self.host.get_replica(sibling).await {
                Ok(current) if current.uri != replica.uri => {
                    self.update_sibling(sibling, &replica.uri).await;
                }
                Ok(_) => {}
                Err(e) => debug!(replica = %sibling, error = %e, "sibling lookup failed"),
            }
        }

        // A blank replica may only now have become manageable
        self.ensure_mirrors(&mut txn.snapshot, entity, &live).await;
        self.store.commit(txn).await?;
        Ok(EventOutcome::Applied)
    }

    async fn on_replica_moved(
        &mut self,
        replica: ReplicaId,
        to_index: u32,
    ) -> MirrorResult<EventOutcome> {
        if self
            .guard
            .consume(SuppressionClass::Move, replica, Instant::now())
        {
            return Ok(EventOutcome::Suppressed);
        }

        let mut txn = self.store.begin().await?;
        let siblings = self.siblings_of(&mut txn.snapshot, replica);
        let outcome = match siblings {
            None => EventOutcome::Ignored,
            Some(siblings) => {
                for sibling in siblings {
                    let current = match self.host.get_replica(sibling).await {
                        Ok(current) => current,
                        Err(e) => {
                            debug!(replica = %sibling, error = %e, "sibling lookup failed");
                            continue;
                        }
                    };
                    // Hosts clamp past-the-end targets; a clamped no-op sends no echo
                    let target = match self.host.list_replicas(current.window).await {
                        Ok(peers) => to_index.min(peers.len().saturating_sub(1) as u32),
                        Err(_) => to_index,
                    };
                    if target != current.index {
                        self.move_sibling(sibling, target).await;
                    }
                }
                EventOutcome::Applied
            }
        };
        self.store.commit(txn).await?;
        Ok(outcome)
    }

    async fn on_focus_changed(&mut self, replica: ReplicaId) -> MirrorResult<EventOutcome> {
        if self
            .guard
            .consume(SuppressionClass::Activation, replica, Instant::now())
        {
            return Ok(EventOutcome::Suppressed);
        }

        let mut txn = self.store.begin().await?;
        let siblings = self.siblings_of(&mut txn.snapshot, replica);
        let outcome = match siblings {
            None => EventOutcome::Ignored,
            Some(siblings) => {
                for sibling in siblings {
                    match self.host.get_replica(sibling).await {
                        Ok(current) if !current.active => self.focus_sibling(sibling).await,
                        Ok(_) => {}
                        Err(e) => debug!(replica = %sibling, error = %e, "sibling lookup failed"),
                    }
                }
                EventOutcome::Applied
            }
        };
        self.store.commit(txn).await?;
        Ok(outcome)
    }

    async fn on_window_opened(&mut self, window: Window) -> MirrorResult<EventOutcome> {
        if !window.is_mirrorable() {
            return Ok(EventOutcome::Ignored);
        }

        let mut txn = self.store.begin().await?;
        for entity in txn.snapshot.entity_ids() {
            let Some(e) = txn.snapshot.entity(entity) else {
                continue;
            };
            if e.replicas.contains_key(&window.id) || !self.policy.is_managed_uri(&e.canonical_uri)
            {
                continue;
            }
            let (uri, space) = (e.canonical_uri.clone(), e.space.clone());
            if let Some(created) = self.create_mirror(window.id, &uri, &space).await {
                txn.snapshot.attach(entity, window.id, created.id);
            }
        }
        self.store.commit(txn).await?;
        Ok(EventOutcome::Applied)
    }

    async fn on_window_closed(&mut self, window: WindowId) -> MirrorResult<EventOutcome> {
        let pruned = self
            .store
            .transact(|snapshot| {
                for entity in snapshot.entity_ids() {
                    snapshot.detach_window(entity, window);
                }
                snapshot.prune_all()
            })
            .await?;
        self.stats.entities_pruned += pruned as u64;
        Ok(EventOutcome::Applied)
    }

    /// Create missing replicas of `entity` in `live` windows and drop its
    /// mappings into windows that are gone. Returns the number of replicas
    /// created.
    pub async fn ensure_mirrors(
        &mut self,
        snapshot: &mut Snapshot,
        entity: EntityId,
        live: &[WindowId],
    ) -> usize {
        let Some(e) = snapshot.entity(entity) else {
            return 0;
        };
        let uri = e.canonical_uri.clone();
        let space = e.space.clone();
        let missing: Vec<WindowId> = live
            .iter()
            .filter(|w| !e.replicas.contains_key(*w))
            .copied()
            .collect();
        let vanished: Vec<WindowId> = e
            .replicas
            .keys()
            .filter(|w| !live.contains(*w))
            .copied()
            .collect();

        for window in vanished {
            snapshot.detach_window(entity, window);
        }

        let mut created = 0;
        if self.policy.is_managed_uri(&uri) {
            for window in missing {
                if let Some(replica) = self.create_mirror(window, &uri, &space).await {
                    snapshot.attach(entity, window, replica.id);
                    created += 1;
                }
            }
        }

        if snapshot.prune(entity) {
            self.stats.entities_pruned += 1;
        }
        created
    }

    /// Sorted ids of windows that take part in mirroring
    pub(crate) async fn live_windows(&self) -> MirrorResult<Vec<WindowId>> {
        let mut ids: Vec<WindowId> = self
            .host
            .list_windows()
            .await?
            .into_iter()
            .filter(Window::is_mirrorable)
            .map(|w| w.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Owning entity of a managed replica, attaching or creating one if the
    /// replica is not indexed yet
    fn resolve_or_attach(&mut self, snapshot: &mut Snapshot, replica: &Replica) -> EntityId {
        if let Some(entity) = snapshot.entity_of(replica.id) {
            return entity;
        }
        let entity = match snapshot.find_attachable(&replica.uri, &replica.space, replica.window) {
            Some(entity) => entity,
            None => {
                self.stats.entities_created += 1;
                snapshot.create_entity(&replica.uri, replica.space.clone())
            }
        };
        snapshot.attach(entity, replica.window, replica.id);
        entity
    }

    fn siblings_of(&self, snapshot: &mut Snapshot, replica: ReplicaId) -> Option<Vec<ReplicaId>> {
        let entity = snapshot.entity_of(replica)?;
        snapshot.entity(entity).map(|e| e.siblings(replica))
    }

    async fn create_mirror(&mut self, window: WindowId, uri: &str, space: &SpaceId) -> Option<Replica> {
        let result = self
            .host
            .create_replica(window, uri, space, CreateOptions::background())
            .await;
        let replica = self.settle("create_replica", None, result)?;
        // The host has assigned the id; its creation event is still queued
        self.guard
            .arm(SuppressionClass::Creation, replica.id, Instant::now());
        Some(replica)
    }

    async fn remove_sibling(&mut self, replica: ReplicaId) {
        let token = self
            .guard
            .arm(SuppressionClass::Removal, replica, Instant::now());
        let result = self.host.remove_replica(replica).await;
        self.settle("remove_replica", Some(token), result);
    }

    async fn update_sibling(&mut self, replica: ReplicaId, uri: &str) {
        let token = self
            .guard
            .arm(SuppressionClass::Update, replica, Instant::now());
        let result = self.host.update_replica(replica, uri).await;
        self.settle("update_replica", Some(token), result);
    }

    async fn move_sibling(&mut self, replica: ReplicaId, index: u32) {
        let token = self.guard.arm(SuppressionClass::Move, replica, Instant::now());
        let result = self.host.move_replica(replica, index).await;
        self.settle("move_replica", Some(token), result);
    }

    async fn focus_sibling(&mut self, replica: ReplicaId) {
        let token = self
            .guard
            .arm(SuppressionClass::Activation, replica, Instant::now());
        let result = self.host.focus_replica(replica).await;
        self.settle("focus_replica", Some(token), result);
    }

    /// Count a host command and swallow its failure
    fn settle<T>(
        &mut self,
        op: &'static str,
        token: Option<SuppressionToken>,
        result: MirrorResult<T>,
    ) -> Option<T> {
        self.stats.commands_issued += 1;
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.stats.commands_failed += 1;
                if let Some(token) = token {
                    self.guard.disarm(token);
                }
                log_command_failure(op, &e);
                None
            }
        }
    }
}

fn log_command_failure(op: &'static str, error: &MirrorError) {
    if error.is_transient() {
        debug!(op, error = %error, "host command failed");
    } else {
        warn!(op, error = %error, "host command failed");
    }
}
