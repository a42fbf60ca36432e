use serde::{Deserialize, Serialize};

/// Tuning knobs for the in-process message bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Upper bound on messages held for one absent recipient. The oldest
    /// message is dropped when the bound is exceeded.
    #[serde(default = "default_max_held_per_recipient")]
    pub max_held_per_recipient: usize,
    /// How many message ids a [`crate::Deduplicator`] remembers.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    /// Whether every message is copied to the monitoring topic.
    #[serde(default = "default_monitor")]
    pub monitor: bool,
}

fn default_max_held_per_recipient() -> usize {
    256
}

fn default_dedup_capacity() -> usize {
    1024
}

fn default_monitor() -> bool {
    true
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_held_per_recipient: default_max_held_per_recipient(),
            dedup_capacity: default_dedup_capacity(),
            monitor: default_monitor(),
        }
    }
}
