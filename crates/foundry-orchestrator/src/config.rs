use foundry_core::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the coordinator picks among idle, capable agents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Lowest recent failure rate, ties broken by most recent heartbeat.
    #[default]
    LowestFailureRate,
    /// Most recent heartbeat, ties broken by lowest failure rate.
    MostRecentHeartbeat,
}

fn default_max_task_attempts() -> u32 {
    3
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_factor() -> u32 {
    3
}

fn default_sweep_interval_ms() -> u64 {
    1_000
}

fn default_outcome_window() -> usize {
    20
}

fn default_true() -> bool {
    true
}

/// Task coordinator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Failed attempts a task may use. Past this, only capable agents that have
    /// not failed the task yet are tried, once each. Heartbeat reassignments
    /// do not count.
    #[serde(default = "default_max_task_attempts")]
    pub max_task_attempts: u32,
    /// Backoff between attempts of the same task. Only the delay fields apply;
    /// the attempt bound is `max_task_attempts`.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Interval agents heartbeat at.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// An agent unheard for `interval * factor` is considered offline.
    #[serde(default = "default_heartbeat_timeout_factor")]
    pub heartbeat_timeout_factor: u32,
    /// How often heartbeats are checked and deferred dispatches retried.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Number of recent outcomes used for an agent's failure rate.
    #[serde(default = "default_outcome_window")]
    pub outcome_window: usize,
    #[serde(default)]
    pub selection: SelectionPolicy,
    /// Store a knowledge entry when a feature completes or fails.
    #[serde(default = "default_true")]
    pub store_outcomes: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_task_attempts: default_max_task_attempts(),
            retry: RetryPolicy::default(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_factor: default_heartbeat_timeout_factor(),
            sweep_interval_ms: default_sweep_interval_ms(),
            outcome_window: default_outcome_window(),
            selection: SelectionPolicy::default(),
            store_outcomes: true,
        }
    }
}

impl CoordinatorConfig {
    /// Silence after which an agent is marked offline.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(
            self.heartbeat_interval_ms
                .saturating_mul(u64::from(self.heartbeat_timeout_factor)),
        )
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}
