//! Workspace fuzzer - random user activity against the engine
//!
//! Generates a seeded stream of user actions (open, close, navigate, move,
//! focus, window churn, failing windows) and checks the workspace invariants
//! after every settled step.

use mirror_core::{Replica, ReplicaId, SpaceId, WindowId, WindowKind};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::Harness;

/// Fuzzer configuration
#[derive(Clone, Debug)]
pub struct FuzzerConfig {
    /// Number of user actions to generate
    pub steps: usize,
    /// Windows open at startup
    pub initial_windows: usize,
    /// Upper bound on open windows
    pub max_windows: usize,
    /// URIs navigated to; a non-managed one is always added
    pub uris: Vec<String>,
    /// Probability that a window starts rejecting commands
    pub failure_prob: f64,
    /// Random seed
    pub seed: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        FuzzerConfig {
            steps: 200,
            initial_windows: 2,
            max_windows: 4,
            uris: vec![
                "https://a.test/".to_string(),
                "https://b.test/".to_string(),
                "https://c.test/page".to_string(),
                "http://d.test/".to_string(),
            ],
            failure_prob: 0.0,
            seed: 42,
        }
    }
}

impl FuzzerConfig {
    /// Light fuzzing for quick tests
    pub fn light() -> Self {
        FuzzerConfig {
            steps: 50,
            ..FuzzerConfig::default()
        }
    }

    /// Windows occasionally fail host commands
    pub fn faulty() -> Self {
        FuzzerConfig {
            failure_prob: 0.05,
            ..FuzzerConfig::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// A generated user action
#[derive(Clone, Debug, PartialEq)]
pub enum UserAction {
    OpenWindow { private: bool },
    CloseWindow(WindowId),
    OpenReplica { window: WindowId, uri: String, pinned: bool, space: SpaceId },
    CloseReplica(ReplicaId),
    Navigate(ReplicaId, String),
    Reorder(ReplicaId, u32),
    Activate(ReplicaId),
    FailWindow(WindowId),
    Restart,
}

/// Result of a fuzz run
#[derive(Clone, Debug, Default)]
pub struct FuzzResult {
    pub steps: usize,
    pub events: usize,
    pub entities: usize,
    pub violations: Vec<String>,
}

impl FuzzResult {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Workspace fuzzer
pub struct WorkspaceFuzzer {
    config: FuzzerConfig,
    rng: StdRng,
    harness: Harness,
}

impl WorkspaceFuzzer {
    pub fn new(config: FuzzerConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        WorkspaceFuzzer {
            config,
            rng,
            harness: Harness::new(),
        }
    }

    pub fn harness(&self) -> &Harness {
        &self.harness
    }

    /// Run the configured number of steps
    pub async fn run(&mut self) -> FuzzResult {
        let mut result = FuzzResult::default();
        for _ in 0..self.config.initial_windows.max(1) {
            self.harness.host.open_window();
        }
        result.events += self.harness.start().await;

        for step in 0..self.config.steps {
            let action = self.next_action();
            self.apply(&action);
            result.events += match action {
                UserAction::Restart => self.harness.start().await,
                _ => self.harness.settle().await,
            };
            result.steps += 1;

            if let Err(violation) = self.harness.check().await {
                result
                    .violations
                    .push(format!("step {} after {:?}: {}", step, action, violation));
            }
        }

        result.entities = self.harness.snapshot().await.len();
        result
    }

    /// Pick the next action from current host state
    pub fn next_action(&mut self) -> UserAction {
        let windows = self.harness.host.window_ids();
        let replicas: Vec<ReplicaId> = windows
            .iter()
            .flat_map(|w| self.harness.host.replicas_in(*w))
            .map(|r| r.id)
            .collect();

        let roll: f64 = self.rng.gen();
        if windows.is_empty() || (roll < 0.05 && windows.len() < self.config.max_windows) {
            return UserAction::OpenWindow {
                private: self.rng.gen_bool(0.2),
            };
        }
        if roll < 0.08 && windows.len() > 1 {
            return UserAction::CloseWindow(*windows.choose(&mut self.rng).unwrap_or(&windows[0]));
        }
        if roll < 0.10 {
            return UserAction::Restart;
        }
        if roll < 0.10 + self.config.failure_prob {
            return UserAction::FailWindow(*windows.choose(&mut self.rng).unwrap_or(&windows[0]));
        }
        if replicas.is_empty() || roll < 0.40 {
            return UserAction::OpenReplica {
                window: *windows.choose(&mut self.rng).unwrap_or(&windows[0]),
                uri: self.pick_uri(),
                pinned: self.rng.gen_bool(0.05),
                space: if self.rng.gen_bool(0.2) {
                    SpaceId::new("work")
                } else {
                    SpaceId::default()
                },
            };
        }

        let replica = *replicas.choose(&mut self.rng).unwrap_or(&replicas[0]);
        match self.rng.gen_range(0..4) {
            0 => UserAction::CloseReplica(replica),
            1 => UserAction::Navigate(replica, self.pick_uri()),
            2 => UserAction::Reorder(replica, self.rng.gen_range(0..4)),
            _ => UserAction::Activate(replica),
        }
    }

    fn pick_uri(&mut self) -> String {
        if self.rng.gen_bool(0.1) {
            return "about:blank".to_string();
        }
        self.config
            .uris
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_else(|| "about:blank".to_string())
    }

    fn apply(&mut self, action: &UserAction) {
        let host = &self.harness.host;
        match action {
            UserAction::OpenWindow { private } => {
                host.open_window_with(WindowKind::Normal, *private);
            }
            UserAction::CloseWindow(window) => host.close_window(*window),
            UserAction::OpenReplica {
                window,
                uri,
                pinned,
                space,
            } => {
                let mut template =
                    Replica::new(ReplicaId::default(), *window, uri.as_str()).with_space(space.clone());
                template.pinned = *pinned;
                host.open_replica_with(template);
            }
            UserAction::CloseReplica(replica) => host.close_replica(*replica),
            UserAction::Navigate(replica, uri) => host.navigate(*replica, uri),
            UserAction::Reorder(replica, index) => host.reorder(*replica, *index),
            UserAction::Activate(replica) => host.activate(*replica),
            UserAction::FailWindow(window) => host.set_closing(*window, true),
            UserAction::Restart => {}
        }
    }
}
