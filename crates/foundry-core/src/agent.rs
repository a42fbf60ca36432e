use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Runtime status an agent reports about itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Ready to accept a task.
    #[default]
    Idle,
    /// Executing a task.
    Busy,
    /// Degraded; will not accept work.
    Error,
    /// Stopped or presumed dead.
    Offline,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Error => write!(f, "error"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Self-description an agent publishes in STATUS and HEARTBEAT messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Bus endpoint name.
    pub endpoint_id: String,
    /// Role label (coder, tester, ...).
    pub role: String,
    /// Capability tags the agent can satisfy.
    pub capabilities: BTreeSet<String>,
    /// Current status.
    pub status: AgentStatus,
    /// Task being executed, if any.
    #[serde(default)]
    pub current_task_id: Option<Uuid>,
    /// When the agent last announced itself.
    pub last_heartbeat: DateTime<Utc>,
}

impl AgentInfo {
    /// Creates an idle agent description.
    pub fn new(
        endpoint_id: impl Into<String>,
        role: impl Into<String>,
        capabilities: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            role: role.into(),
            capabilities: capabilities.into_iter().collect(),
            status: AgentStatus::Idle,
            current_task_id: None,
            last_heartbeat: Utc::now(),
        }
    }

    /// Whether this agent's capabilities are a superset of `required`.
    pub fn covers(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }

    /// Whether the agent has a single capability.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_covers_is_superset_check() {
        let agent = AgentInfo::new("coder-1", "coder", caps(&["coding", "rust"]));
        assert!(agent.covers(&caps(&["coding"])));
        assert!(agent.covers(&caps(&["coding", "rust"])));
        assert!(agent.covers(&BTreeSet::new()));
        assert!(!agent.covers(&caps(&["coding", "deploy"])));
    }

    #[test]
    fn test_new_agent_is_idle() {
        let agent = AgentInfo::new("t", "tester", caps(&["testing"]));
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(agent.current_task_id.is_none());
        assert!(agent.has_capability("testing"));
    }
}
