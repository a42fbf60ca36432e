use crate::error::FoundryResult;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default redelivery bound for messages built with [`Message::new`].
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// What a [`Message`] carries, which decides how receivers dispatch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Coordinator to agent: execute this task.
    TaskAssignment,
    /// Agent to coordinator: outcome of an assigned task.
    TaskResult,
    /// Agent registration and status changes.
    Status,
    /// Broadcast control traffic (cancellation and similar).
    Coordination,
    /// A receiver could not handle a message.
    Error,
    /// Periodic liveness signal.
    Heartbeat,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageKind::TaskAssignment => "task_assignment",
            MessageKind::TaskResult => "task_result",
            MessageKind::Status => "status",
            MessageKind::Coordination => "coordination",
            MessageKind::Error => "error",
            MessageKind::Heartbeat => "heartbeat",
        };
        f.write_str(s)
    }
}

/// Message priority. Ordered so that `Low < Normal < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background traffic.
    Low,
    /// The default.
    #[default]
    Normal,
    /// Ahead of normal traffic.
    High,
    /// Must not wait behind anything else.
    Critical,
}

/// A unit of communication between the coordinator and agents.
///
/// Messages are immutable once sent. A redelivery is a new value produced by
/// [`Message::redelivery`], which keeps `retry_count <= max_retries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier, used by receivers for idempotency.
    pub id: Uuid,
    /// Endpoint name of the sender.
    pub sender: String,
    /// Endpoint name or broadcast topic this message is addressed to.
    pub recipient: String,
    /// Message kind.
    pub kind: MessageKind,
    /// Kind-specific JSON payload.
    pub payload: serde_json::Value,
    /// UTC creation time.
    pub timestamp: DateTime<Utc>,
    /// Links a response to the request that caused it.
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    /// Delivery priority.
    #[serde(default)]
    pub priority: Priority,
    /// Seconds the bus may hold this message for an absent recipient. `0`
    /// means fail immediately.
    #[serde(default)]
    pub ttl: u64,
    /// How many times this message has been redelivered.
    #[serde(default)]
    pub retry_count: u32,
    /// Upper bound for `retry_count`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Message {
    /// Creates a message with a fresh id, normal priority and no TTL.
    pub fn new(
        kind: MessageKind,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            recipient: recipient.into(),
            kind,
            payload,
            timestamp: Utc::now(),
            correlation_id: None,
            priority: Priority::Normal,
            ttl: 0,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Creates a message whose payload is the JSON encoding of `payload`.
    pub fn with_payload<T: Serialize>(
        kind: MessageKind,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        payload: &T,
    ) -> FoundryResult<Self> {
        Ok(Self::new(kind, sender, recipient, serde_json::to_value(payload)?))
    }

    /// Sets the correlation id.
    pub fn correlated(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the hold time in seconds for absent recipients.
    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl = ttl_secs;
        self
    }

    /// Sets the redelivery bound.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self.retry_count = self.retry_count.min(max_retries);
        self
    }

    /// Decodes the payload into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> FoundryResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Returns the next delivery attempt of this message, or `None` once the
    /// redelivery bound is reached.
    ///
    /// The copy keeps the same `id` so receivers can deduplicate it.
    pub fn redelivery(&self) -> Option<Self> {
        if self.retry_count >= self.max_retries {
            return None;
        }
        let mut next = self.clone();
        next.retry_count += 1;
        Some(next)
    }

    /// Whether a message held since `held_at` has outlived its TTL at `now`.
    pub fn is_expired_at(&self, held_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::seconds(i64::try_from(self.ttl).unwrap_or(i64::MAX));
        now.signed_duration_since(held_at) >= ttl
    }
}
