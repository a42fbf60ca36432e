//! Reserved bus topics and endpoint naming.

/// Endpoint name the task coordinator listens on.
pub const COORDINATOR_ENDPOINT: &str = "coordinator";

/// Topic every agent subscribes to for broadcast control traffic.
pub const COORDINATION: &str = "broadcast.coordination";

/// Monitoring topic that receives a copy of every published message.
pub const ALL_MESSAGES: &str = "system.all_messages";

/// Point-to-point topic for an endpoint.
pub fn agent_topic(endpoint_id: &str) -> String {
    format!("agent.{endpoint_id}")
}

/// Progress stream topic for a feature.
pub fn feature_topic(feature_id: &uuid::Uuid) -> String {
    format!("feature.{feature_id}")
}
