//! Suppression guard - provenance of self-issued commands
//!
//! The host reports every mutation, including the ones the engine issued
//! itself. Before a command goes out the engine arms a token for the target
//! replica; when the echo event arrives the token is consumed and the event
//! is not reprocessed. Tokens expire after a fixed TTL in case an echo never
//! shows up, and the guard never holds more than `capacity` of them.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use mirror_core::ReplicaId;
use tracing::debug;

/// Event class an armed token suppresses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SuppressionClass {
    Creation,
    Update,
    Removal,
    Activation,
    Move,
}

/// Handle to one armed suppression
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SuppressionToken(u64);

/// Guard configuration
#[derive(Clone, Debug)]
pub struct GuardConfig {
    /// Lifetime of an unconsumed token
    pub ttl: Duration,
    /// Maximum number of armed tokens
    pub capacity: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        GuardConfig {
            ttl: Duration::from_millis(750),
            capacity: 1024,
        }
    }
}

/// Counters for guard activity
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GuardStats {
    pub armed: u64,
    pub consumed: u64,
    pub disarmed: u64,
    pub expired: u64,
    pub evicted: u64,
}

#[derive(Clone, Debug)]
struct Pending {
    token: SuppressionToken,
    class: SuppressionClass,
    replica: ReplicaId,
    armed_at: Instant,
}

/// Process-local record of commands whose echoes must be ignored
#[derive(Debug)]
pub struct SuppressionGuard {
    config: GuardConfig,
    /// Armed tokens, oldest first
    pending: VecDeque<Pending>,
    next_token: u64,
    stats: GuardStats,
}

impl SuppressionGuard {
    pub fn new() -> Self {
        Self::with_config(GuardConfig::default())
    }

    pub fn with_config(config: GuardConfig) -> Self {
        SuppressionGuard {
            config,
            pending: VecDeque::new(),
            next_token: 0,
            stats: GuardStats::default(),
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn stats(&self) -> &GuardStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Record that an echo of `class` for `replica` is expected
    pub fn arm(
        &mut self,
        class: SuppressionClass,
        replica: ReplicaId,
        now: Instant,
    ) -> SuppressionToken {
        while self.pending.len() >= self.config.capacity.max(1) {
            if let Some(evicted) = self.pending.pop_front() {
                debug!(
                    class = ?evicted.class,
                    replica = %evicted.replica,
                    "suppression guard full, evicting oldest token"
                );
                self.stats.evicted += 1;
            }
        }

        let token = SuppressionToken(self.next_token);
        self.next_token = self.next_token.wrapping_add(1);
        self.pending.push_back(Pending {
            token,
            class,
            replica,
            armed_at: now,
        });
        self.stats.armed += 1;
        token
    }

    /// Withdraw a token whose command failed; returns false if already gone
    pub fn disarm(&mut self, token: SuppressionToken) -> bool {
        match self.pending.iter().position(|p| p.token == token) {
            Some(pos) => {
                self.pending.remove(pos);
                self.stats.disarmed += 1;
                true
            }
            None => false,
        }
    }

    /// Consume the oldest live token matching an incoming event.
    ///
    /// Returns true when the event is an echo and must be suppressed.
    pub fn consume(&mut self, class: SuppressionClass, replica: ReplicaId, now: Instant) -> bool {
        let ttl = self.config.ttl;
        let mut expired = 0;
        let mut found = None;
        self.pending.retain(|p| {
            if p.class != class || p.replica != replica {
                return true;
            }
            if now.saturating_duration_since(p.armed_at) > ttl {
                expired += 1;
                return false;
            }
            if found.is_none() {
                found = Some(p.token);
                return false;
            }
            true
        });
        self.stats.expired += expired;
        if found.is_some() {
            self.stats.consumed += 1;
        }
        found.is_some()
    }

    /// Check for a live token without consuming it
    pub fn is_armed(&self, class: SuppressionClass, replica: ReplicaId, now: Instant) -> bool {
        self.pending.iter().any(|p| {
            p.class == class
                && p.replica == replica
                && now.saturating_duration_since(p.armed_at) <= self.config.ttl
        })
    }

    /// Drop expired tokens; returns how many went
    pub fn sweep(&mut self, now: Instant) -> usize {
        let ttl = self.config.ttl;
        let before = self.pending.len();
        self.pending
            .retain(|p| now.saturating_duration_since(p.armed_at) <= ttl);
        let dropped = before - self.pending.len();
        self.stats.expired += dropped as u64;
        dropped
    }

    /// Forget every armed token
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl Default for SuppressionGuard {
    fn default() -> Self {
        Self::new()
    }
}
