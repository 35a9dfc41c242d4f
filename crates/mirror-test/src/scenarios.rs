//! Canned workspace scenarios
//!
//! Setup helpers shared by the behavioural tests below and the router tests.

use mirror_core::{ReplicaId, WindowId};

use crate::Harness;

/// Harness with `count` normal windows, started and settled
pub async fn with_windows(count: usize) -> (Harness, Vec<WindowId>) {
    let mut harness = Harness::new();
    let windows = (0..count).map(|_| harness.host.open_window()).collect();
    harness.start().await;
    harness.host.clear_commands();
    harness.clear_processed();
    (harness, windows)
}

/// Populate the host with `uris` in every window without running the engine
pub fn seed_host(harness: &Harness, windows: &[WindowId], uris: &[&str]) -> Vec<ReplicaId> {
    let mut ids = Vec::new();
    for window in windows {
        for uri in uris {
            ids.push(harness.host.open_replica(*window, uri));
        }
    }
    harness.host.discard_events();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Command;
    use mirror_core::{EventKind, ManagedPolicy, Replica, SpaceId, WindowKind};
    use mirror_state::{EventOutcome, ReconcilerConfig};
    use proptest::prelude::*;

    const A: &str = "https://a.test/";
    const B: &str = "https://b.test/";

    fn creates(commands: &[Command]) -> usize {
        commands
            .iter()
            .filter(|c| matches!(c, Command::Create { .. }))
            .count()
    }

    #[tokio::test]
    async fn test_open_mirrors_into_other_window() {
        let (mut h, w) = with_windows(2).await;

        let r1 = h.host.open_replica(w[0], A);
        h.settle().await;

        let mirrored = h.host.replicas_in(w[1]);
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0].uri, A);

        let snapshot = h.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        let entity = snapshot.entities().next().unwrap();
        assert_eq!(entity.replica_in(w[0]), Some(r1));
        assert_eq!(entity.replica_in(w[1]), Some(mirrored[0].id));

        // One create, and its echo was recognised
        assert_eq!(creates(&h.host.commands()), 1);
        assert_eq!(h.count(EventKind::ReplicaCreated, EventOutcome::Suppressed), 1);
        h.check().await.unwrap();
        h.check_converged().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_closes_siblings_and_prunes() {
        let (mut h, w) = with_windows(2).await;
        h.host.open_replica(w[0], A);
        h.settle().await;

        let mirror = h.host.replicas_in(w[1])[0].id;
        h.host.close_replica(mirror);
        h.settle().await;

        assert!(h.host.replicas_in(w[0]).is_empty());
        assert!(h.host.replicas_in(w[1]).is_empty());
        let snapshot = h.snapshot().await;
        assert!(snapshot.is_empty());
        assert!(snapshot.reverse.is_empty());
        assert_eq!(h.count(EventKind::ReplicaRemoved, EventOutcome::Suppressed), 1);
        assert_eq!(h.engine.stats().entities_pruned, 1);
    }

    #[tokio::test]
    async fn test_navigation_propagates() {
        let (mut h, w) = with_windows(2).await;
        let r1 = h.host.open_replica(w[0], A);
        h.settle().await;
        h.host.clear_commands();

        h.host.navigate(r1, B);
        h.settle().await;

        let mirror = &h.host.replicas_in(w[1])[0];
        assert_eq!(mirror.uri, B);
        let snapshot = h.snapshot().await;
        assert_eq!(snapshot.entities().next().unwrap().canonical_uri, B);
        assert_eq!(h.host.commands(), vec![Command::Update(mirror.id, B.to_string())]);
        assert_eq!(h.count(EventKind::ReplicaUpdated, EventOutcome::Suppressed), 1);
    }

    #[tokio::test]
    async fn test_new_window_receives_every_entity() {
        let (mut h, w) = with_windows(1).await;
        h.host.open_replica(w[0], A);
        h.host.open_replica(w[0], B);
        h.settle().await;

        let w2 = h.host.open_window();
        h.settle().await;

        let mut uris: Vec<_> = h.host.replicas_in(w2).into_iter().map(|r| r.uri).collect();
        uris.sort();
        assert_eq!(uris, vec![A.to_string(), B.to_string()]);
        h.check_converged().await.unwrap();
    }

    #[tokio::test]
    async fn test_pinned_replica_is_ignored() {
        let (mut h, w) = with_windows(2).await;
        let pinned = h
            .host
            .open_replica_with(Replica::new(ReplicaId::default(), w[0], A).pinned());
        h.settle().await;
        h.host.navigate(pinned, B);
        h.settle().await;

        assert!(h.snapshot().await.is_empty());
        assert!(h.host.commands().is_empty());
        assert!(h.host.replicas_in(w[1]).is_empty());
    }

    #[tokio::test]
    async fn test_unmanaged_uri_is_ignored_until_navigated() {
        let (mut h, w) = with_windows(2).await;
        let blank = h.host.open_replica(w[0], "about:blank");
        h.settle().await;
        assert!(h.snapshot().await.is_empty());

        h.host.navigate(blank, A);
        h.settle().await;
        assert_eq!(h.snapshot().await.len(), 1);
        assert_eq!(h.host.replicas_in(w[1])[0].uri, A);
    }

    #[tokio::test]
    async fn test_private_and_popup_windows_stay_out() {
        let (mut h, w) = with_windows(1).await;
        let private = h.host.open_private_window();
        let popup = h.host.open_window_with(WindowKind::Popup, false);
        h.settle().await;

        h.host.open_replica(w[0], A);
        h.host.open_replica(private, B);
        h.settle().await;

        assert!(h.host.replicas_in(private).len() == 1);
        assert!(h.host.replicas_in(popup).is_empty());
        let layout = h.layout().await;
        assert_eq!(layout.len(), 1);
        assert_eq!(layout[A], vec![w[0]]);
    }

    #[tokio::test]
    async fn test_duplicate_in_same_window_is_its_own_entity() {
        let (mut h, w) = with_windows(2).await;
        h.host.open_replica(w[0], A);
        h.settle().await;
        h.host.open_replica(w[0], A);
        h.settle().await;

        assert_eq!(h.snapshot().await.len(), 2);
        assert_eq!(h.host.replicas_in(w[1]).len(), 2);
        h.check().await.unwrap();
    }

    #[tokio::test]
    async fn test_spaces_do_not_mix() {
        let (mut h, w) = with_windows(2).await;
        let work = SpaceId::new("work");
        h.host
            .open_replica_with(Replica::new(ReplicaId::default(), w[0], A).with_space(work.clone()));
        h.settle().await;
        h.host.open_replica(w[1], A);
        h.settle().await;

        let snapshot = h.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        let spaces: Vec<_> = h.host.replicas_in(w[1]).into_iter().map(|r| r.space).collect();
        assert!(spaces.contains(&work));
        assert!(spaces.contains(&SpaceId::default()));
        h.check_converged().await.unwrap();
    }

    #[tokio::test]
    async fn test_move_and_focus_are_mirrored() {
        let (mut h, w) = with_windows(2).await;
        let a = h.host.open_replica(w[0], A);
        let b = h.host.open_replica(w[0], B);
        h.settle().await;

        h.host.reorder(b, 0);
        h.settle().await;
        let order: Vec<_> = h.host.replicas_in(w[1]).into_iter().map(|r| r.uri).collect();
        assert_eq!(order, vec![B.to_string(), A.to_string()]);
        assert_eq!(h.count(EventKind::ReplicaMoved, EventOutcome::Suppressed), 1);

        h.host.activate(a);
        h.settle().await;
        let active: Vec<_> = h
            .host
            .replicas_in(w[1])
            .into_iter()
            .filter(|r| r.active)
            .map(|r| r.uri)
            .collect();
        assert_eq!(active, vec![A.to_string()]);
        assert_eq!(h.count(EventKind::FocusChanged, EventOutcome::Suppressed), 1);
    }

    #[tokio::test]
    async fn test_clamped_move_leaves_no_token_behind() {
        let (mut h, w) = with_windows(2).await;
        h.host.open_replica(w[1], "about:blank");
        let a = h.host.open_replica(w[0], A);
        h.host.open_replica(w[0], "about:blank");
        h.host.open_replica(w[0], "about:blank");
        h.settle().await;

        // The mirror is already last in the shorter window
        let mirror = h.host.replicas_in(w[1])[1].clone();
        assert_eq!(mirror.uri, A);
        h.host.reorder(a, 2);
        h.settle().await;
        assert!(h.engine.guard().is_empty());
        assert!(h.host.commands().iter().all(|c| !matches!(c, Command::Move(..))));

        h.host.reorder(mirror.id, 0);
        h.settle().await;
        assert_eq!(h.count(EventKind::ReplicaMoved, EventOutcome::Suppressed), 1);
        assert_eq!(h.count(EventKind::ReplicaMoved, EventOutcome::Applied), 2);
        assert_eq!(h.host.replica(a).unwrap().index, 0);
    }

    #[tokio::test]
    async fn test_custom_schemes_decide_what_is_mirrored() {
        let config = ReconcilerConfig {
            policy: ManagedPolicy::with_schemes(["FTP"]),
            ..ReconcilerConfig::default()
        };
        let mut h = Harness::with_config(config);
        let w1 = h.host.open_window();
        let w2 = h.host.open_window();
        h.start().await;
        assert_eq!(h.engine.policy().schemes, vec!["ftp".to_string()]);

        h.host.open_replica(w1, "ftp://files.test/pub");
        h.host.open_replica(w1, A);
        h.settle().await;

        let mirrored: Vec<_> = h.host.replicas_in(w2).into_iter().map(|r| r.uri).collect();
        assert_eq!(mirrored, vec!["ftp://files.test/pub".to_string()]);
        assert_eq!(h.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_window_close_keeps_other_replicas() {
        let (mut h, w) = with_windows(3).await;
        h.host.open_replica(w[0], A);
        h.settle().await;

        h.host.close_window(w[2]);
        h.settle().await;

        let layout = h.layout().await;
        assert_eq!(layout[A], vec![w[0], w[1]]);
        assert!(h.host.commands().iter().all(|c| !matches!(c, Command::Remove(_))));
        h.check().await.unwrap();
    }

    #[tokio::test]
    async fn test_closing_last_window_prunes_entities() {
        let (mut h, w) = with_windows(1).await;
        h.host.open_replica(w[0], A);
        h.host.open_replica(w[0], B);
        h.settle().await;

        h.host.close_window(w[0]);
        h.settle().await;

        let snapshot = h.snapshot().await;
        assert!(snapshot.is_empty());
        assert!(snapshot.reverse.is_empty());
        assert_eq!(h.engine.stats().entities_pruned, 2);
    }

    #[tokio::test]
    async fn test_host_failures_are_swallowed() {
        let (mut h, w) = with_windows(2).await;
        h.host.set_closing(w[1], true);

        h.host.open_replica(w[0], A);
        h.settle().await;

        assert_eq!(h.count(EventKind::ReplicaCreated, EventOutcome::Applied), 1);
        assert_eq!(h.engine.stats().commands_failed, 1);
        assert_eq!(h.layout().await[A], vec![w[0]]);
        assert!(h.engine.guard().is_empty());
        h.check().await.unwrap();

        // Retried once the window accepts commands again
        h.host.set_closing(w[1], false);
        assert_eq!(h.engine.ensure_all().await.unwrap(), 1);
        h.settle().await;
        h.check_converged().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_removal_still_detaches() {
        let (mut h, w) = with_windows(2).await;
        let r1 = h.host.open_replica(w[0], A);
        h.settle().await;

        h.host.set_closing(w[1], true);
        h.host.close_replica(r1);
        h.settle().await;

        assert!(h.snapshot().await.is_empty());
        assert_eq!(h.host.replicas_in(w[1]).len(), 1);
        assert!(h.engine.guard().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_all_is_idempotent() {
        let (mut h, w) = with_windows(3).await;
        h.host.open_replica(w[0], A);
        h.host.open_replica(w[1], B);
        h.settle().await;
        h.host.clear_commands();

        assert_eq!(h.engine.ensure_all().await.unwrap(), 0);
        assert_eq!(h.engine.ensure_all().await.unwrap(), 0);
        assert!(h.host.commands().is_empty());
    }

    #[tokio::test]
    async fn test_startup_rebuild_from_live_replicas() {
        let mut h = Harness::new();
        let windows: Vec<_> = (0..3).map(|_| h.host.open_window()).collect();
        seed_host(&h, &windows, &[A, B, "https://c.test/", "https://d.test/"]);

        h.start().await;

        let snapshot = h.snapshot().await;
        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot.reverse.len(), 12);
        assert!(snapshot.entities().all(|e| e.replicas.len() == 3));
        assert!(h.host.commands().is_empty());
        h.check().await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_fills_gaps() {
        let mut h = Harness::new();
        let w1 = h.host.open_window();
        let w2 = h.host.open_window();
        seed_host(&h, &[w1], &[A]);
        seed_host(&h, &[w2], &[B]);

        h.start().await;

        assert_eq!(creates(&h.host.commands()), 2);
        h.check_converged().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_discards_stale_state() {
        let (mut h, w) = with_windows(2).await;
        h.host.open_replica(w[0], A);
        h.settle().await;
        let before = h.snapshot().await;
        h.host.clear_commands();

        h.start().await;
        let after = h.snapshot().await;
        assert_eq!(after.len(), 1);
        assert!(after.reverse.map.keys().eq(before.reverse.map.keys()));
        assert!(h.host.commands().iter().all(|c| !matches!(c, Command::Create { .. })));
    }

    #[tokio::test]
    async fn test_expired_token_lets_event_through() {
        let config = ReconcilerConfig {
            guard: mirror_state::GuardConfig {
                ttl: std::time::Duration::from_millis(1),
                capacity: 16,
            },
            ..ReconcilerConfig::default()
        };
        let mut h = Harness::with_config(config);
        let w1 = h.host.open_window();
        h.host.open_window();
        h.start().await;

        h.host.open_replica(w1, A);
        let opened = h.host.next_event().unwrap();
        h.dispatch(opened).await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        h.settle().await;

        // The echo arrived too late and was reconciled as a new sighting
        assert_eq!(h.count(EventKind::ReplicaCreated, EventOutcome::Suppressed), 0);
        assert_eq!(h.snapshot().await.len(), 1);
        h.check().await.unwrap();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_invariants_hold_for_any_seed(seed in any::<u64>(), steps in 10usize..80) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let config = crate::FuzzerConfig { steps, ..crate::FuzzerConfig::faulty() }.with_seed(seed);
            let result = runtime.block_on(crate::WorkspaceFuzzer::new(config).run());
            prop_assert!(result.is_valid(), "{:?}", result.violations);
        }
    }
}
