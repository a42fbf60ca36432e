use foundry_core::{ExecutionResult, TaskSpecification};
use serde::{Deserialize, Serialize};

/// Ordered validation stages. A failure in one stage skips the later ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    /// The result is well formed.
    Structure,
    /// The produced content meets quality rules.
    Quality,
    /// The content addresses the acceptance criteria.
    Acceptance,
}

impl ValidationStage {
    /// Stages in execution order.
    pub const ORDER: [ValidationStage; 3] = [
        ValidationStage::Structure,
        ValidationStage::Quality,
        ValidationStage::Acceptance,
    ];
}

impl std::fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationStage::Structure => write!(f, "structure"),
            ValidationStage::Quality => write!(f, "quality"),
            ValidationStage::Acceptance => write!(f, "acceptance"),
        }
    }
}

/// Status of a single gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pass,
    Fail,
    Skip,
}

/// Result of running one gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub gate: String,
    pub stage: ValidationStage,
    pub status: GateStatus,
    pub message: Option<String>,
}

impl GateOutcome {
    pub fn pass(gate: impl Into<String>, stage: ValidationStage) -> Self {
        Self {
            gate: gate.into(),
            stage,
            status: GateStatus::Pass,
            message: None,
        }
    }

    pub fn fail(gate: impl Into<String>, stage: ValidationStage, message: impl Into<String>) -> Self {
        Self {
            gate: gate.into(),
            stage,
            status: GateStatus::Fail,
            message: Some(message.into()),
        }
    }

    pub fn skip(gate: impl Into<String>, stage: ValidationStage, message: impl Into<String>) -> Self {
        Self {
            gate: gate.into(),
            stage,
            status: GateStatus::Skip,
            message: Some(message.into()),
        }
    }

    /// Pass and skip both count as success.
    pub fn is_success(&self) -> bool {
        matches!(self.status, GateStatus::Pass | GateStatus::Skip)
    }
}

/// What a gate inspects: the task, its result, and the result's text.
#[derive(Debug)]
pub struct ValidationInput<'a> {
    pub task: &'a TaskSpecification,
    pub result: &'a ExecutionResult,
    /// Output and artifact contents joined, computed once per validation.
    pub text: String,
}

impl<'a> ValidationInput<'a> {
    pub fn new(task: &'a TaskSpecification, result: &'a ExecutionResult) -> Self {
        Self {
            task,
            result,
            text: result.text(),
        }
    }
}

/// A single pass/fail check on a task result.
pub trait ValidationGate: Send + Sync {
    /// Stable gate name used in reports.
    fn name(&self) -> &str;

    /// Stage the gate runs in.
    fn stage(&self) -> ValidationStage;

    /// Runs the check.
    fn check(&self, input: &ValidationInput<'_>) -> GateOutcome;
}
