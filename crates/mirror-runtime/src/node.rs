//! Mirror node - the event router actor
//!
//! One inbound queue, one loop. Every host event is reconciled to completion
//! before the next message is received, so workspace transactions never
//! interleave.

use std::time::{Duration, Instant};

use mirror_core::{Host, HostEvent, MirrorError, MirrorResult};
use mirror_state::{
    EventOutcome, GuardStats, KeyValueStore, ReconcileStats, Reconciler, Snapshot,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use crate::MirrorConfig;

/// Router statistics
#[derive(Clone, Debug, Default)]
pub struct RuntimeStats {
    pub events_received: u64,
    pub sweeps: u64,
    pub tokens_expired: u64,
    pub last_event_duration: Duration,
    pub reconcile: ReconcileStats,
    pub guard: GuardStats,
}

/// Messages accepted by the router
#[derive(Debug)]
pub enum RouterMessage {
    Event(HostEvent),
    Snapshot {
        reply: oneshot::Sender<MirrorResult<Snapshot>>,
    },
    Stats {
        reply: oneshot::Sender<RuntimeStats>,
    },
    /// Answered once every earlier message has been processed
    Flush {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Cloneable sender side of a running [`MirrorNode`]
#[derive(Clone, Debug)]
pub struct MirrorHandle {
    tx: mpsc::Sender<RouterMessage>,
}

impl MirrorHandle {
    /// Queue a host event, waiting for room
    pub async fn dispatch(&self, event: HostEvent) -> MirrorResult<()> {
        self.tx
            .send(RouterMessage::Event(event))
            .await
            .map_err(|_| MirrorError::ChannelClosed)
    }

    /// Queue a host event without waiting
    pub fn try_dispatch(&self, event: HostEvent) -> MirrorResult<()> {
        self.tx
            .try_send(RouterMessage::Event(event))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => MirrorError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => MirrorError::ChannelClosed,
            })
    }

    /// Current persisted workspace, read between events
    pub async fn snapshot(&self) -> MirrorResult<Snapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(RouterMessage::Snapshot { reply }).await?;
        rx.await.map_err(|_| MirrorError::ChannelClosed)?
    }

    pub async fn stats(&self) -> MirrorResult<RuntimeStats> {
        let (reply, rx) = oneshot::channel();
        self.send(RouterMessage::Stats { reply }).await?;
        rx.await.map_err(|_| MirrorError::ChannelClosed)
    }

    /// Wait until every message queued before this call has been handled
    pub async fn flush(&self) -> MirrorResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(RouterMessage::Flush { reply }).await?;
        rx.await.map_err(|_| MirrorError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> MirrorResult<()> {
        self.send(RouterMessage::Shutdown).await
    }

    async fn send(&self, message: RouterMessage) -> MirrorResult<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| MirrorError::ChannelClosed)
    }
}

/// The router actor owning the reconciler
pub struct MirrorNode<H, S> {
    reconciler: Reconciler<H, S>,
    inbox: mpsc::Receiver<RouterMessage>,
    config: MirrorConfig,
    stats: RuntimeStats,
}

impl<H, S> MirrorNode<H, S>
where
    H: Host + 'static,
    S: KeyValueStore + 'static,
{
    /// Create a node and the handle that feeds it
    pub fn new(host: H, store: S, config: MirrorConfig) -> (Self, MirrorHandle) {
        let (tx, inbox) = mpsc::channel(config.queue_capacity.max(1));
        let node = MirrorNode {
            reconciler: Reconciler::with_config(host, store, config.reconciler()),
            inbox,
            config,
            stats: RuntimeStats::default(),
        };
        (node, MirrorHandle { tx })
    }

    /// Create a node and run it on the current tokio runtime
    pub fn spawn(host: H, store: S, config: MirrorConfig) -> (MirrorHandle, JoinHandle<()>) {
        let (node, handle) = Self::new(host, store, config);
        (handle, tokio::spawn(node.run()))
    }

    pub fn reconciler(&self) -> &Reconciler<H, S> {
        &self.reconciler
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(queue = self.config.queue_capacity, "mirror router started");

        loop {
            tokio::select! {
                message = self.inbox.recv() => match message {
                    Some(RouterMessage::Shutdown) | None => break,
                    Some(message) => self.process(message).await,
                },
                _ = sweep.tick() => self.sweep(),
            }
        }

        info!(events = self.stats.events_received, "mirror router stopped");
    }

    async fn process(&mut self, message: RouterMessage) {
        match message {
            RouterMessage::Event(event) => {
                let start = Instant::now();
                self.stats.events_received += 1;
                let outcome = self.reconciler.handle(event).await;
                self.stats.last_event_duration = start.elapsed();
                if outcome == EventOutcome::Failed {
                    debug!("event dropped after failure");
                }
            }
            RouterMessage::Snapshot { reply } => {
                let _ = reply.send(self.reconciler.snapshot().await);
            }
            RouterMessage::Stats { reply } => {
                let _ = reply.send(self.current_stats());
            }
            RouterMessage::Flush { reply } => {
                let _ = reply.send(());
            }
            RouterMessage::Shutdown => {}
        }
    }

    fn sweep(&mut self) {
        self.stats.sweeps += 1;
        let dropped = self.reconciler.guard_mut().sweep(Instant::now());
        if dropped > 0 {
            self.stats.tokens_expired += dropped as u64;
            trace!(dropped, "expired suppression tokens");
        }
    }

    fn current_stats(&self) -> RuntimeStats {
        RuntimeStats {
            reconcile: self.reconciler.stats().clone(),
            guard: self.reconciler.guard().stats().clone(),
            ..self.stats.clone()
        }
    }
}

/// Forward host events from a host-side channel into the router
pub fn start_event_pump(
    handle: MirrorHandle,
    mut events: mpsc::UnboundedReceiver<HostEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if handle.dispatch(event).await.is_err() {
                break; // Router stopped
            }
        }
    })
}
