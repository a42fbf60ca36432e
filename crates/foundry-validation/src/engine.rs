use crate::config::ValidationConfig;
use crate::gate::{GateOutcome, GateStatus, ValidationGate, ValidationInput, ValidationStage};
use crate::gates::{
    AcceptanceCriteriaGate, ForbiddenPatternGate, MinLengthGate, NonEmptyOutputGate, SuccessGate,
};
use foundry_core::{ExecutionResult, FoundryResult, TaskSpecification};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// Outcome of validating one task result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub task_id: Uuid,
    pub outcomes: Vec<GateOutcome>,
    pub passed: bool,
    /// Fraction of non-skipped gates that passed. `1.0` when every gate skipped.
    pub score: f64,
}

impl ValidationReport {
    /// Gates that failed.
    pub fn failures(&self) -> impl Iterator<Item = &GateOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == GateStatus::Fail)
    }

    /// One-line description of every failure, for error messages.
    pub fn failure_summary(&self) -> String {
        self.failures()
            .map(|o| match &o.message {
                Some(msg) => format!("{}: {msg}", o.gate),
                None => o.gate.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Aggregate over every task of a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureValidation {
    pub reports: Vec<ValidationReport>,
    pub passed: bool,
    /// Mean report score. `1.0` with no reports.
    pub score: f64,
}

/// Runs an ordered set of gates against task results.
pub struct ValidationEngine {
    gates: Vec<Box<dyn ValidationGate>>,
}

impl std::fmt::Debug for ValidationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationEngine")
            .field("gates", &self.gate_names())
            .finish()
    }
}

impl ValidationEngine {
    /// Engine with no gates. Every result passes.
    pub fn empty() -> Self {
        Self { gates: Vec::new() }
    }

    /// Engine with the built-in gates configured from `config`.
    pub fn from_config(config: &ValidationConfig) -> FoundryResult<Self> {
        let mut engine = Self::empty()
            .with_gate(SuccessGate)
            .with_gate(NonEmptyOutputGate)
            .with_gate(MinLengthGate::new(config.min_output_chars))
            .with_gate(ForbiddenPatternGate::new(&config.forbidden_patterns)?);
        if config.check_acceptance {
            engine = engine.with_gate(AcceptanceCriteriaGate::new(config.min_keyword_len));
        }
        Ok(engine)
    }

    /// Adds a gate. Gates run grouped by stage, in insertion order within a stage.
    pub fn with_gate(mut self, gate: impl ValidationGate + 'static) -> Self {
        self.gates.push(Box::new(gate));
        self
    }

    /// Names of the registered gates, in registration order.
    pub fn gate_names(&self) -> Vec<&str> {
        self.gates.iter().map(|g| g.name()).collect()
    }

    /// Validates one result.
    pub fn validate(&self, task: &TaskSpecification, result: &ExecutionResult) -> ValidationReport {
        let input = ValidationInput::new(task, result);
        let mut outcomes = Vec::with_capacity(self.gates.len());
        let mut failed_stage: Option<ValidationStage> = None;

        for stage in ValidationStage::ORDER {
            for gate in self.gates.iter().filter(|g| g.stage() == stage) {
                let outcome = match failed_stage {
                    Some(prior) => GateOutcome::skip(
                        gate.name(),
                        stage,
                        format!("skipped after {prior} failure"),
                    ),
                    None => gate.check(&input),
                };
                outcomes.push(outcome);
            }
            if failed_stage.is_none()
                && outcomes
                    .iter()
                    .any(|o| o.stage == stage && o.status == GateStatus::Fail)
            {
                failed_stage = Some(stage);
            }
        }

        let passes = outcomes.iter().filter(|o| o.status == GateStatus::Pass).count();
        let fails = outcomes.iter().filter(|o| o.status == GateStatus::Fail).count();
        let score = if passes + fails == 0 {
            1.0
        } else {
            passes as f64 / (passes + fails) as f64
        };
        let report = ValidationReport {
            task_id: task.id,
            passed: fails == 0,
            score,
            outcomes,
        };
        debug!(
            task_id = %task.id,
            passed = report.passed,
            score = report.score,
            "validated task result"
        );
        report
    }

    /// Validates every `(task, result)` pair and aggregates.
    pub fn validate_all<'a, I>(&self, items: I) -> FeatureValidation
    where
        I: IntoIterator<Item = (&'a TaskSpecification, &'a ExecutionResult)>,
    {
        let reports: Vec<ValidationReport> = items
            .into_iter()
            .map(|(task, result)| self.validate(task, result))
            .collect();
        let passed = reports.iter().all(|r| r.passed);
        let score = if reports.is_empty() {
            1.0
        } else {
            reports.iter().map(|r| r.score).sum::<f64>() / reports.len() as f64
        };
        info!(tasks = reports.len(), passed, score, "feature validation");
        FeatureValidation {
            reports,
            passed,
            score,
        }
    }
}
