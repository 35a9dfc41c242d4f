//! End-to-end runs through the router
//!
//! The simulated host publishes its events on a channel, an event pump feeds
//! them to a running [`mirror_runtime::MirrorNode`], and the tests poll the
//! router until the workspace settles.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use mirror_core::HostEvent;
    use mirror_runtime::{start_event_pump, MirrorConfig, MirrorHandle, MirrorNode};
    use mirror_state::MemoryStore;

    use crate::{check_against_host, SimulatedHost};

    const A: &str = "https://a.test/";

    async fn wait_until<F>(handle: &MirrorHandle, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        for _ in 0..100 {
            handle.flush().await.unwrap();
            if done() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_router_mirrors_and_closes() {
        let host = Arc::new(SimulatedHost::new());
        let w1 = host.open_window();
        let w2 = host.open_window();
        host.discard_events();
        let events = host.subscribe();

        let (handle, task) =
            MirrorNode::spawn(host.clone(), MemoryStore::new(), MirrorConfig::low_latency());
        let pump = start_event_pump(handle.clone(), events);
        handle.dispatch(HostEvent::ProcessStarted).await.unwrap();

        let r1 = host.open_replica(w1, A);
        assert!(wait_until(&handle, || host.replicas_in(w2).len() == 1).await);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        snapshot.check_invariants().unwrap();
        check_against_host(&snapshot, &host).unwrap();

        host.close_replica(r1);
        assert!(wait_until(&handle, || host.replica_count() == 0).await);

        // The removal echo may still be in flight
        let mut stats = handle.stats().await.unwrap();
        for _ in 0..100 {
            if stats.reconcile.suppressed == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            stats = handle.stats().await.unwrap();
        }
        assert!(handle.snapshot().await.unwrap().is_empty());
        assert_eq!(stats.reconcile.suppressed, 2);
        assert_eq!(stats.reconcile.failed, 0);
        assert_eq!(stats.reconcile.commands_issued, 2);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        pump.abort();
    }

    #[tokio::test]
    async fn test_router_sweeps_expired_tokens() {
        let host = Arc::new(SimulatedHost::new());
        let w1 = host.open_window();
        host.open_window();
        host.discard_events();
        // Not subscribed: echoes stay in the host queue and never reach the router

        let mut config = MirrorConfig::low_latency();
        config.guard.ttl = Duration::from_millis(5);
        let (handle, task) = MirrorNode::spawn(host.clone(), MemoryStore::new(), config);
        handle.dispatch(HostEvent::ProcessStarted).await.unwrap();

        host.open_replica(w1, A);
        let opened = host.next_event().unwrap();
        handle.dispatch(opened).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.flush().await.unwrap();
        let stats = handle.stats().await.unwrap();
        assert!(stats.sweeps > 0);
        assert_eq!(stats.tokens_expired, 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }
}
