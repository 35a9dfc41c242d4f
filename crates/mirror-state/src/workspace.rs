//! Workspace - logical entities and the reverse index
//!
//! A [`Snapshot`] pairs the two persisted records and is the only place the
//! bijection between entity replica maps and the reverse index is maintained.

use std::collections::BTreeMap;

use mirror_core::{EntityId, ReplicaId, SpaceId, WindowId};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One user-visible thing that should exist once per window
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalEntity {
    pub id: EntityId,
    pub canonical_uri: String,
    /// Always false; pinned replicas never enter the workspace
    pub pinned: bool,
    pub space: SpaceId,
    /// At most one replica per window
    pub replicas: BTreeMap<WindowId, ReplicaId>,
}

impl LogicalEntity {
    pub fn new(id: EntityId, canonical_uri: impl Into<String>, space: SpaceId) -> Self {
        LogicalEntity {
            id,
            canonical_uri: canonical_uri.into(),
            pinned: false,
            space,
            replicas: BTreeMap::new(),
        }
    }

    pub fn replica_in(&self, window: WindowId) -> Option<ReplicaId> {
        self.replicas.get(&window).copied()
    }

    /// Replicas other than `replica`, in window order
    pub fn siblings(&self, replica: ReplicaId) -> Vec<ReplicaId> {
        self.replicas
            .values()
            .copied()
            .filter(|r| *r != replica)
            .collect()
    }

    /// Sort key used to break ties between otherwise equal candidates
    fn precedence(&self) -> (bool, Option<(WindowId, ReplicaId)>, EntityId) {
        let first = self.replicas.iter().next().map(|(w, r)| (*w, *r));
        (first.is_none(), first, self.id)
    }
}

/// Persisted workspace record
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Bumped by every successful commit
    pub version: u64,
    pub entities: BTreeMap<EntityId, LogicalEntity>,
}

/// Persisted replica id -> entity id lookup
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReverseIndex {
    pub map: BTreeMap<ReplicaId, EntityId>,
}

impl ReverseIndex {
    pub fn get(&self, replica: ReplicaId) -> Option<EntityId> {
        self.map.get(&replica).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Mutable view over both records
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub workspace: Workspace,
    pub reverse: ReverseIndex,
}

impl Snapshot {
    pub fn new() -> Self {
        Snapshot::default()
    }

    pub fn entity(&self, id: EntityId) -> Option<&LogicalEntity> {
        self.workspace.entities.get(&id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut LogicalEntity> {
        self.workspace.entities.get_mut(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &LogicalEntity> {
        self.workspace.entities.values()
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.workspace.entities.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.workspace.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workspace.entities.is_empty()
    }

    /// Owning entity of a replica.
    ///
    /// A reverse entry that points at a missing entity, or at an entity that
    /// no longer lists the replica, is treated as unmapped and dropped.
    pub fn entity_of(&mut self, replica: ReplicaId) -> Option<EntityId> {
        let id = self.reverse.get(replica)?;
        let consistent = self
            .entity(id)
            .is_some_and(|e| e.replicas.values().any(|r| *r == replica));
        if consistent {
            Some(id)
        } else {
            debug!(replica = %replica, entity = %id, "dropping stale reverse entry");
            self.reverse.map.remove(&replica);
            None
        }
    }

    /// Insert a new entity with no replicas
    pub fn create_entity(&mut self, uri: &str, space: SpaceId) -> EntityId {
        let mut id = EntityId::generate();
        while self.workspace.entities.contains_key(&id) {
            id = EntityId::generate();
        }
        self.workspace
            .entities
            .insert(id, LogicalEntity::new(id, uri, space));
        id
    }

    /// Entity that an unindexed replica with this identity should join.
    ///
    /// Candidates share the URI and space and have no replica in `window`.
    /// Ties go to the entity whose earliest replica (lowest window id, then
    /// lowest replica id) sorts first; empty entities come last.
    pub fn find_attachable(&self, uri: &str, space: &SpaceId, window: WindowId) -> Option<EntityId> {
        self.workspace
            .entities
            .values()
            .filter(|e| e.canonical_uri == uri && &e.space == space)
            .filter(|e| !e.replicas.contains_key(&window))
            .min_by_key(|e| e.precedence())
            .map(|e| e.id)
    }

    /// Map `replica` in `window` to `entity`.
    ///
    /// Any previous owner of the replica, and any previous replica of the
    /// entity in that window, is unmapped first. A previous owner left empty
    /// is pruned.
    /// Returns false when the entity does not exist.
    pub fn attach(&mut self, entity: EntityId, window: WindowId, replica: ReplicaId) -> bool {
        if !self.workspace.entities.contains_key(&entity) {
            return false;
        }
        if let Some(previous) = self.reverse.get(replica) {
            if previous != entity {
                self.detach_replica(replica);
                self.prune(previous);
            }
        }
        let Some(e) = self.workspace.entities.get_mut(&entity) else {
            return false;
        };
        e.replicas.retain(|w, r| *w == window || *r != replica);
        if let Some(displaced) = e.replicas.insert(window, replica) {
            if displaced != replica {
                self.reverse.map.remove(&displaced);
            }
        }
        self.reverse.map.insert(replica, entity);
        true
    }

    /// Unmap a replica from whichever entity owns it
    pub fn detach_replica(&mut self, replica: ReplicaId) -> Option<EntityId> {
        let entity = self.reverse.map.remove(&replica)?;
        if let Some(e) = self.workspace.entities.get_mut(&entity) {
            e.replicas.retain(|_, r| *r != replica);
        }
        Some(entity)
    }

    /// Unmap an entity's replica in `window`
    pub fn detach_window(&mut self, entity: EntityId, window: WindowId) -> Option<ReplicaId> {
        let replica = self.workspace.entities.get_mut(&entity)?.replicas.remove(&window)?;
        if self.reverse.get(replica) == Some(entity) {
            self.reverse.map.remove(&replica);
        }
        Some(replica)
    }

    /// Remove the entity if it has no replicas left
    pub fn prune(&mut self, entity: EntityId) -> bool {
        let empty = self
            .entity(entity)
            .is_some_and(|e| e.replicas.is_empty());
        if empty {
            self.workspace.entities.remove(&entity);
            self.reverse.map.retain(|_, e| *e != entity);
        }
        empty
    }

    /// Remove every entity with no replicas; returns how many went
    pub fn prune_all(&mut self) -> usize {
        let empty: Vec<EntityId> = self
            .entities()
            .filter(|e| e.replicas.is_empty())
            .map(|e| e.id)
            .collect();
        empty.into_iter().filter(|id| self.prune(*id)).count()
    }

    /// Verify the reverse-index bijection, one owner per replica and that no
    /// entity is empty or pinned
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut seen: BTreeMap<ReplicaId, EntityId> = BTreeMap::new();
        for entity in self.entities() {
            if entity.replicas.is_empty() {
                return Err(format!("entity {} has no replicas", entity.id));
            }
            if entity.pinned {
                return Err(format!("entity {} is pinned", entity.id));
            }
            for replica in entity.replicas.values() {
                if let Some(other) = seen.insert(*replica, entity.id) {
                    return Err(format!(
                        "replica {} owned by {} and {}",
                        replica, other, entity.id
                    ));
                }
                if self.reverse.get(*replica) != Some(entity.id) {
                    return Err(format!(
                        "replica {} of entity {} missing from reverse index",
                        replica, entity.id
                    ));
                }
            }
        }
        if seen.len() != self.reverse.len() {
            return Err(format!(
                "reverse index has {} entries, entities hold {}",
                self.reverse.len(),
                seen.len()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URI: &str = "https://example.org/";

    fn w(id: u64) -> WindowId {
        WindowId::new(id)
    }

    fn r(id: u64) -> ReplicaId {
        ReplicaId::new(id)
    }

    #[test]
    fn test_attach_and_lookup() {
        let mut snap = Snapshot::new();
        let id = snap.create_entity(URI, SpaceId::default());
        assert!(snap.attach(id, w(1), r(10)));
        assert!(snap.attach(id, w(2), r(20)));

        assert_eq!(snap.entity_of(r(10)), Some(id));
        assert_eq!(snap.entity(id).unwrap().siblings(r(10)), vec![r(20)]);
        assert!(snap.check_invariants().is_ok());
    }

    #[test]
    fn test_attach_moves_replica_between_entities() {
        let mut snap = Snapshot::new();
        let a = snap.create_entity(URI, SpaceId::default());
        let b = snap.create_entity(URI, SpaceId::default());
        snap.attach(a, w(1), r(10));
        snap.attach(a, w(2), r(20));
        snap.attach(b, w(1), r(20));

        assert_eq!(snap.entity_of(r(20)), Some(b));
        assert_eq!(snap.entity(a).unwrap().replica_in(w(2)), None);
        assert!(snap.check_invariants().is_ok());
    }

    #[test]
    fn test_attach_displaces_window_replica() {
        let mut snap = Snapshot::new();
        let id = snap.create_entity(URI, SpaceId::default());
        snap.attach(id, w(1), r(10));
        snap.attach(id, w(1), r(11));

        assert_eq!(snap.entity(id).unwrap().replicas.len(), 1);
        assert_eq!(snap.reverse.get(r(10)), None);
        assert!(snap.check_invariants().is_ok());
    }

    #[test]
    fn test_detach_and_prune() {
        let mut snap = Snapshot::new();
        let id = snap.create_entity(URI, SpaceId::default());
        snap.attach(id, w(1), r(10));

        assert_eq!(snap.detach_replica(r(10)), Some(id));
        assert!(snap.prune(id));
        assert!(snap.is_empty());
        assert!(snap.reverse.is_empty());
    }

    #[test]
    fn test_stale_reverse_entry_is_repaired() {
        let mut snap = Snapshot::new();
        snap.reverse.map.insert(r(5), EntityId::new(99));

        assert_eq!(snap.entity_of(r(5)), None);
        assert!(snap.reverse.is_empty());
    }

    #[test]
    fn test_find_attachable_tie_break() {
        let mut snap = Snapshot::new();
        let late = snap.create_entity(URI, SpaceId::default());
        let early = snap.create_entity(URI, SpaceId::default());
        snap.attach(late, w(3), r(30));
        snap.attach(early, w(2), r(20));

        assert_eq!(snap.find_attachable(URI, &SpaceId::default(), w(1)), Some(early));
        // Entity already present in the window is not a candidate
        assert_eq!(snap.find_attachable(URI, &SpaceId::default(), w(2)), Some(late));
        assert_eq!(snap.find_attachable(URI, &SpaceId::new("work"), w(1)), None);
    }

    #[test]
    fn test_workspace_serde_shape() {
        let mut snap = Snapshot::new();
        let id = snap.create_entity(URI, SpaceId::default());
        snap.attach(id, w(1), r(10));

        let json = serde_json::to_value(&snap.reverse).unwrap();
        assert_eq!(json["10"], serde_json::json!(id.0));

        let back: Workspace =
            serde_json::from_value(serde_json::to_value(&snap.workspace).unwrap()).unwrap();
        assert_eq!(back, snap.workspace);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Attach { window: u64, replica: u64, uri: u8 },
        DetachReplica(u64),
        DetachWindow(u64),
    }

    fn op() -> impl proptest::strategy::Strategy<Value = Op> {
        use proptest::prelude::*;
        prop_oneof![
            (1u64..4, 1u64..12, 0u8..3).prop_map(|(window, replica, uri)| Op::Attach {
                window,
                replica,
                uri
            }),
            (1u64..12).prop_map(Op::DetachReplica),
            (1u64..4).prop_map(Op::DetachWindow),
        ]
    }

    proptest::proptest! {
        #[test]
        fn prop_mutations_keep_bijection(ops in proptest::collection::vec(op(), 1..60)) {
            let mut snap = Snapshot::new();
            let space = SpaceId::default();
            for op in ops {
                match op {
                    Op::Attach { window, replica, uri } => {
                        let uri = format!("https://site{}.test/", uri);
                        let entity = snap
                            .find_attachable(&uri, &space, w(window))
                            .unwrap_or_else(|| snap.create_entity(&uri, space.clone()));
                        snap.attach(entity, w(window), r(replica));
                    }
                    Op::DetachReplica(replica) => {
                        if let Some(entity) = snap.detach_replica(r(replica)) {
                            snap.prune(entity);
                        }
                    }
                    Op::DetachWindow(window) => {
                        for entity in snap.entity_ids() {
                            snap.detach_window(entity, w(window));
                        }
                        snap.prune_all();
                    }
                }
                proptest::prop_assert_eq!(snap.check_invariants(), Ok(()));
            }
        }
    }
}
