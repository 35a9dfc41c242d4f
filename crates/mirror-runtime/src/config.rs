//! Runtime configuration

use std::time::Duration;

use mirror_core::ManagedPolicy;
use mirror_state::{GuardConfig, ReconcilerConfig};

/// Logging configuration
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Mirror node configuration
#[derive(Clone, Debug)]
pub struct MirrorConfig {
    /// Maximum queued host events
    pub queue_capacity: usize,
    /// How often expired suppression tokens are dropped
    pub sweep_interval: Duration,
    pub guard: GuardConfig,
    pub policy: ManagedPolicy,
    pub log: LogConfig,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        MirrorConfig {
            queue_capacity: 1000,
            sweep_interval: Duration::from_millis(250),
            guard: GuardConfig::default(),
            policy: ManagedPolicy::default(),
            log: LogConfig::default(),
        }
    }
}

impl MirrorConfig {
    /// Short timers for tests and simulations
    pub fn low_latency() -> Self {
        MirrorConfig {
            queue_capacity: 256,
            sweep_interval: Duration::from_millis(20),
            guard: GuardConfig {
                ttl: Duration::from_millis(500),
                capacity: 256,
            },
            policy: ManagedPolicy::default(),
            log: LogConfig {
                filter: "debug".to_string(),
                json: false,
            },
        }
    }

    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            policy: self.policy.clone(),
            guard: self.guard.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MirrorConfig::default();
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.guard.ttl, Duration::from_millis(750));
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn test_reconciler_config_follows_node_config() {
        let config = MirrorConfig::low_latency();
        let reconciler = config.reconciler();
        assert_eq!(reconciler.guard.capacity, 256);
        assert_eq!(reconciler.policy, ManagedPolicy::default());
    }
}
