//! Startup rebuild - reconstruct the workspace from live replicas
//!
//! Persisted state may be stale after a restart, so it is discarded and
//! rebuilt from ground truth. Windows are visited by ascending id and their
//! replicas by position, then id; the first replica seen for a
//! `(space, uri)` identity founds the entity.

use mirror_core::{Host, MirrorResult};
use tracing::{debug, info};

use crate::{KeyValueStore, Reconciler, Snapshot};

/// Summary of a startup rebuild
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub windows: usize,
    pub replicas: usize,
    pub entities: usize,
    pub mirrors_created: usize,
}

impl<H: Host, S: KeyValueStore> Reconciler<H, S> {
    /// Discard persisted state and rebuild it from the host
    pub async fn rebuild(&mut self) -> MirrorResult<RebuildReport> {
        self.guard.clear();
        self.store.reset().await?;

        let windows = self.live_windows().await?;
        let mut snapshot = Snapshot::new();
        let mut report = RebuildReport {
            windows: windows.len(),
            ..RebuildReport::default()
        };

        for window in &windows {
            let mut replicas = match self.host.list_replicas(*window).await {
                Ok(replicas) => replicas,
                Err(e) => {
                    debug!(%window, error = %e, "skipping window during rebuild");
                    continue;
                }
            };
            replicas.sort_by_key(|r| (r.index, r.id));

            let managed: Vec<_> = replicas
                .iter()
                .filter(|r| self.policy.is_managed(r))
                .collect();
            for replica in managed {
                let entity = match snapshot.find_attachable(&replica.uri, &replica.space, *window) {
                    Some(entity) => entity,
                    None => {
                        self.stats.entities_created += 1;
                        snapshot.create_entity(&replica.uri, replica.space.clone())
                    }
                };
                snapshot.attach(entity, *window, replica.id);
                report.replicas += 1;
            }
        }

        let mut txn = self.store.begin().await?;
        txn.snapshot = snapshot;
        self.store.commit(txn).await?;

        report.mirrors_created = self.ensure_all().await?;
        report.entities = self.store.load().await?.len();
        info!(
            windows = report.windows,
            replicas = report.replicas,
            entities = report.entities,
            mirrors_created = report.mirrors_created,
            "workspace rebuilt"
        );
        Ok(report)
    }

    /// Run ensure-mirrors for every entity; returns replicas created
    pub async fn ensure_all(&mut self) -> MirrorResult<usize> {
        let live = self.live_windows().await?;
        let mut txn = self.store.begin().await?;
        let mut created = 0;
        for entity in txn.snapshot.entity_ids() {
            created += self.ensure_mirrors(&mut txn.snapshot, entity, &live).await;
        }
        self.store.commit(txn).await?;
        Ok(created)
    }
}
