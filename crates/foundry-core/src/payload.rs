use crate::task::{ExecutionResult, TaskSpecification};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload of a `TaskAssignment` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    /// The task to execute.
    pub task: TaskSpecification,
    /// 1-based attempt number for this task.
    pub attempt: u32,
}

/// Payload of a `TaskResult` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResultPayload {
    /// Task the result belongs to.
    pub task_id: Uuid,
    /// Feature owning the task.
    pub feature_id: Uuid,
    /// Agent that executed the task.
    pub endpoint_id: String,
    /// The outcome.
    pub result: ExecutionResult,
}

/// Payload of an `Error` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable error.
    pub error: String,
    /// Id of the message that could not be handled.
    pub original_message_id: Uuid,
}

/// Payload of a `Coordination` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinationPayload {
    /// Abort a task that is currently executing.
    CancelTask {
        /// Feature owning the task.
        feature_id: Uuid,
        /// Task to abort.
        task_id: Uuid,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_coordination_is_tagged() {
        let payload = CoordinationPayload::CancelTask {
            feature_id: Uuid::nil(),
            task_id: Uuid::nil(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["type"], "cancel_task");
        let back: CoordinationPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
    }
}
