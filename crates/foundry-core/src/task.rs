use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Lifecycle status of a task inside its feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies or an agent.
    #[default]
    Todo,
    /// Assigned and executing.
    InProgress,
    /// Result received, awaiting validation.
    Review,
    /// Finished and validated.
    Completed,
    /// Retry budget exhausted.
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Todo => write!(f, "todo"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Review => write!(f, "review"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Which feature stage a task belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    /// Runs while the feature is in IMPLEMENTATION.
    #[default]
    Implementation,
    /// Runs after review, while the feature is in DEPLOYMENT.
    Deployment,
}

/// A unit of work derived from a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpecification {
    /// Unique task id.
    pub id: Uuid,
    /// Owning feature.
    pub feature_id: Uuid,
    /// Short title.
    pub title: String,
    /// What the task must accomplish.
    pub description: String,
    /// Capability tags an agent must have to take this task.
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    /// Tasks in the same feature that must complete first.
    #[serde(default)]
    pub dependencies: BTreeSet<Uuid>,
    /// Ordered requirement statements.
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Ordered acceptance criteria checked by validation.
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Current status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Endpoint executing the task, once assigned.
    #[serde(default)]
    pub assigned_endpoint: Option<String>,
    /// Feature stage this task runs in.
    #[serde(default)]
    pub phase: TaskPhase,
    /// UTC creation time.
    pub created_at: DateTime<Utc>,
}

impl TaskSpecification {
    /// Creates a `Todo` implementation-phase task with no dependencies.
    pub fn new(feature_id: Uuid, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            feature_id,
            title: title.into(),
            description: description.into(),
            required_capabilities: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            requirements: Vec::new(),
            acceptance_criteria: Vec::new(),
            status: TaskStatus::Todo,
            assigned_endpoint: None,
            phase: TaskPhase::Implementation,
            created_at: Utc::now(),
        }
    }

    /// Adds a required capability.
    pub fn requires(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.insert(capability.into());
        self
    }

    /// Adds dependencies.
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = Uuid>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    /// Sets the requirement list.
    pub fn with_requirements(mut self, requirements: Vec<String>) -> Self {
        self.requirements = requirements;
        self
    }

    /// Sets the acceptance criteria.
    pub fn with_acceptance_criteria(mut self, criteria: Vec<String>) -> Self {
        self.acceptance_criteria = criteria;
        self
    }

    /// Sets the phase.
    pub fn in_phase(mut self, phase: TaskPhase) -> Self {
        self.phase = phase;
        self
    }

    /// A task is ready when it is `Todo` and every dependency is in `completed`.
    pub fn is_ready(&self, completed: &BTreeSet<Uuid>) -> bool {
        self.status == TaskStatus::Todo && self.dependencies.is_subset(completed)
    }
}

/// Kind of artifact produced by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// A specification or design note.
    Spec,
    /// Source code.
    Code,
    /// Test code or a test report.
    Test,
    /// Review findings.
    Review,
    /// Free-form report.
    Report,
    /// Deployment manifest or log.
    Deployment,
}

/// Something an agent produced while executing a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// What the content is.
    pub kind: ArtifactKind,
    /// Artifact body.
    pub content: String,
    /// UTC creation time.
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Creates an artifact timestamped now.
    pub fn new(kind: ArtifactKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Outcome of one task attempt. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Structured output.
    #[serde(default)]
    pub output: serde_json::Value,
    /// Ordered error messages.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Produced artifacts.
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    /// Wall-clock duration of the attempt.
    #[serde(default)]
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    /// A successful result with the given output.
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            errors: Vec::new(),
            artifacts: Vec::new(),
            execution_time_ms: 0,
        }
    }

    /// A failed result with the given errors.
    pub fn failure<I, S>(errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            success: false,
            output: serde_json::Value::Null,
            errors: errors.into_iter().map(Into::into).collect(),
            artifacts: Vec::new(),
            execution_time_ms: 0,
        }
    }

    /// Attaches an artifact.
    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Sets the measured execution time.
    pub fn with_execution_time(mut self, ms: u64) -> Self {
        self.execution_time_ms = ms;
        self
    }

    /// Output and artifact contents joined into one searchable text.
    pub fn text(&self) -> String {
        let mut parts = Vec::with_capacity(self.artifacts.len() + 1);
        match &self.output {
            serde_json::Value::Null => {}
            serde_json::Value::String(s) => parts.push(s.clone()),
            other => parts.push(other.to_string()),
        }
        parts.extend(self.artifacts.iter().map(|a| a.content.clone()));
        parts.join("\n")
    }
}

/// A task together with the knowledge context injected for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTask {
    /// The task to execute.
    pub task: TaskSpecification,
    /// Retrieved context, empty when nothing relevant was found.
    pub context: String,
    /// How many knowledge entries went into `context`.
    pub context_sources: usize,
}

impl EnrichedTask {
    /// Wraps a task with no context.
    pub fn bare(task: TaskSpecification) -> Self {
        Self {
            task,
            context: String::new(),
            context_sources: 0,
        }
    }
}
