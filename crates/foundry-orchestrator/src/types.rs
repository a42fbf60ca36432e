use chrono::{DateTime, Utc};
use foundry_core::Priority;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureState {
    /// Waiting for decomposition.
    #[default]
    Planning,
    /// Implementation-phase tasks are being dispatched.
    Implementation,
    /// Produced artifacts are being validated as a whole.
    Review,
    /// Deployment-phase tasks are being dispatched.
    Deployment,
    Completed,
    Failed,
    Cancelled,
}

impl FeatureState {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FeatureState::Completed | FeatureState::Failed | FeatureState::Cancelled
        )
    }

    /// Whether a cancel request is honoured in this state.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, FeatureState::Planning | FeatureState::Implementation)
    }

    /// Transition table of the feature state machine.
    pub fn can_transition_to(&self, next: FeatureState) -> bool {
        use FeatureState::*;
        match (self, next) {
            (Planning, Implementation)
            | (Implementation, Review)
            | (Review, Deployment)
            | (Deployment, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            (from, Cancelled) => from.is_cancellable(),
            _ => false,
        }
    }
}

impl std::fmt::Display for FeatureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FeatureState::Planning => "planning",
            FeatureState::Implementation => "implementation",
            FeatureState::Review => "review",
            FeatureState::Deployment => "deployment",
            FeatureState::Completed => "completed",
            FeatureState::Failed => "failed",
            FeatureState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A unit of work submitted to the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

impl FeatureRequest {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_requirements(mut self, requirements: Vec<String>) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn with_acceptance_criteria(mut self, criteria: Vec<String>) -> Self {
        self.acceptance_criteria = criteria;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Reply to a feature submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub feature_id: Uuid,
    pub status: FeatureState,
}

/// A feature as tracked by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub requirements: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub context: Option<serde_json::Value>,
    pub state: FeatureState,
    /// Task ids in decomposition order. Dependency edges live on the tasks.
    pub tasks: Vec<Uuid>,
    /// Completed tasks as a percentage of all tasks.
    pub progress: u8,
    /// Unresolved task errors, set on terminal failure.
    pub errors: Vec<String>,
    /// Attempts consumed by the task that exhausted its budget.
    pub exhausted_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Feature {
    /// A new feature in `Planning`.
    pub fn from_request(request: FeatureRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: request.title,
            description: request.description,
            priority: request.priority,
            requirements: request.requirements,
            acceptance_criteria: request.acceptance_criteria,
            context: request.context,
            state: FeatureState::Planning,
            tasks: Vec::new(),
            progress: 0,
            errors: Vec::new(),
            exhausted_retries: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves to `next` if the state machine allows it.
    pub fn transition(&mut self, next: FeatureState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        self.updated_at = Utc::now();
        true
    }
}

/// Kind of progress event published on `feature.{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventKind {
    ProgressUpdate,
    TaskCompleted,
    StateChanged,
    FeatureCompleted,
    FeatureFailed,
    FeatureCancelled,
}

/// One entry in a feature's progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressEventKind,
    pub feature_id: Uuid,
    pub progress: u8,
    pub timestamp: DateTime<Utc>,
    pub state: FeatureState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ProgressEvent {
    /// Event reflecting the feature's current state.
    pub fn of(kind: ProgressEventKind, feature: &Feature) -> Self {
        Self {
            kind,
            feature_id: feature.id,
            progress: feature.progress,
            timestamp: Utc::now(),
            state: feature.state,
            task_id: None,
            errors: feature.errors.clone(),
        }
    }

    pub fn for_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Whether this event ends the stream.
    pub fn is_final(&self) -> bool {
        matches!(
            self.kind,
            ProgressEventKind::FeatureCompleted
                | ProgressEventKind::FeatureFailed
                | ProgressEventKind::FeatureCancelled
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path_allowed() {
        use FeatureState::*;
        assert!(Planning.can_transition_to(Implementation));
        assert!(Implementation.can_transition_to(Review));
        assert!(Review.can_transition_to(Deployment));
        assert!(Deployment.can_transition_to(Completed));
    }

    #[test]
    fn test_skips_and_regressions_rejected() {
        use FeatureState::*;
        assert!(!Planning.can_transition_to(Review));
        assert!(!Implementation.can_transition_to(Completed));
        assert!(!Review.can_transition_to(Implementation));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Planning));
    }

    #[test]
    fn test_cancel_only_early() {
        use FeatureState::*;
        assert!(Planning.can_transition_to(Cancelled));
        assert!(Implementation.can_transition_to(Cancelled));
        assert!(!Review.can_transition_to(Cancelled));
        assert!(!Deployment.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Cancelled));
    }

    #[test]
    fn test_any_live_state_can_fail() {
        use FeatureState::*;
        for state in [Planning, Implementation, Review, Deployment] {
            assert!(state.can_transition_to(Failed), "{state}");
        }
    }

    #[test]
    fn test_feature_transition_updates_timestamp() {
        let mut feature = Feature::from_request(FeatureRequest::new("X", "x"));
        let before = feature.updated_at;
        assert!(!feature.transition(FeatureState::Completed));
        assert!(feature.transition(FeatureState::Implementation));
        assert!(feature.updated_at >= before);
        assert_eq!(feature.state, FeatureState::Implementation);
    }

    #[test]
    fn test_progress_event_wire_shape() {
        let feature = Feature::from_request(FeatureRequest::new("X", "x"));
        let task_id = Uuid::new_v4();
        let event = ProgressEvent::of(ProgressEventKind::TaskCompleted, &feature).for_task(task_id);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "task_completed");
        assert_eq!(value["state"], "planning");
        assert_eq!(value["task_id"], task_id.to_string());
        assert!(value["errors"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_submit_response_status_is_planning() {
        let response = SubmitResponse {
            feature_id: Uuid::new_v4(),
            status: FeatureState::Planning,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "planning");
    }

    #[test]
    fn test_request_defaults() {
        let request: FeatureRequest = serde_json::from_str(r#"{"title":"X"}"#).unwrap();
        assert_eq!(request.priority, Priority::Normal);
        assert!(request.requirements.is_empty());
        assert!(request.context.is_none());
    }
}
