use thiserror::Error;

/// A convenience `Result` alias using [`FoundryError`].
pub type FoundryResult<T> = Result<T, FoundryError>;

/// Top-level error type for the Foundry orchestration engine.
///
/// The first group of variants is the orchestration taxonomy. Each one has a
/// defined recovery path (see [`FoundryError::is_recoverable`]). The rest are
/// subsystem and ambient failures.
#[derive(Debug, Error)]
pub enum FoundryError {
    /// No live subscriber exists for the addressed endpoint.
    #[error("RecipientUnavailable: {0}")]
    RecipientUnavailable(String),

    /// The knowledge store did not answer in time or is closed.
    #[error("StoreUnavailable: {0}")]
    StoreUnavailable(String),

    /// A task execution exceeded its time budget.
    #[error("ExecutionTimeout: {0}")]
    ExecutionTimeout(String),

    /// A task execution failed.
    #[error("ExecutionError: {0}")]
    Execution(String),

    /// The task dependency graph contains a cycle.
    #[error("DependencyCycle: {0}")]
    DependencyCycle(String),

    /// No registered agent covers a required capability.
    #[error("UnsatisfiableCapability: {0}")]
    UnsatisfiableCapability(String),

    /// A task depends on a task that does not exist in the same feature.
    #[error("UnsatisfiableDependency: {0}")]
    UnsatisfiableDependency(String),

    /// An agent stopped sending heartbeats.
    #[error("HeartbeatTimeout: {0}")]
    HeartbeatTimeout(String),

    /// A message bus failure other than an unavailable recipient.
    #[error("Bus error: {0}")]
    Bus(String),

    /// A knowledge store failure (embedding, persistence, dimension mismatch).
    #[error("Knowledge error: {0}")]
    Knowledge(String),

    /// A validation engine failure.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An error from the task coordinator.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// The operation was cancelled.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FoundryError {
    /// Whether the error has a local recovery path (retry, fallback or
    /// reassignment) rather than being fatal to the feature that raised it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FoundryError::RecipientUnavailable(_)
                | FoundryError::StoreUnavailable(_)
                | FoundryError::ExecutionTimeout(_)
                | FoundryError::Execution(_)
                | FoundryError::HeartbeatTimeout(_)
        )
    }
}
