use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded exponential backoff shared by every retry loop in the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy with the given bound and base delay, capped at 30s.
    pub fn new(max_retries: u32, backoff_base_ms: u64) -> Self {
        Self {
            max_retries,
            backoff_base_ms,
            ..Self::default()
        }
    }

    /// Backoff in milliseconds before retry number `attempt` (0-based):
    /// `base * 2^attempt`, capped at `backoff_max_ms`.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        delay.min(self.backoff_max_ms)
    }

    /// [`RetryPolicy::backoff_ms`] as a `Duration`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms(attempt))
    }

    /// Total attempts this policy allows, including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff_base_ms, 500);
        assert_eq!(policy.backoff_max_ms, 30_000);
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
        };
        assert_eq!(policy.backoff_ms(0), 100);
        assert_eq!(policy.backoff_ms(1), 200);
        assert_eq!(policy.backoff_ms(3), 800);
        assert_eq!(policy.backoff_ms(4), 1_000);
        assert_eq!(policy.backoff_ms(63), 1_000);
    }

    #[test]
    fn test_partial_config_takes_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_retries": 1}"#).unwrap();
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.backoff_base_ms, 500);
    }
}
