use foundry_core::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-agent runtime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    /// Go OFFLINE after this many consecutive heartbeats nobody received.
    /// `0` disables self-detection.
    #[serde(default)]
    pub offline_after_unheard_beats: u32,
    /// Backoff for delivering TASK_RESULT messages.
    #[serde(default)]
    pub result_retry: RetryPolicy,
    /// Record each task outcome in the knowledge store.
    #[serde(default = "default_store_outcomes")]
    pub store_outcomes: bool,
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_task_timeout_ms() -> u64 {
    3_600_000
}

fn default_store_outcomes() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            task_timeout_ms: default_task_timeout_ms(),
            offline_after_unheard_beats: 0,
            result_retry: RetryPolicy::default(),
            store_outcomes: default_store_outcomes(),
        }
    }
}

impl RuntimeConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}

/// How much retrieved knowledge goes into a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Similarity floor for injected entries.
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f32,
    /// Character budget for the assembled context.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

fn default_max_results() -> usize {
    8
}

fn default_min_relevance() -> f32 {
    0.6
}

fn default_max_chars() -> usize {
    2000
}

fn default_query_timeout_ms() -> u64 {
    2_000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            min_relevance: default_min_relevance(),
            max_chars: default_max_chars(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

impl ContextConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}
