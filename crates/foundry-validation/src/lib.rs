//! Validation gates for task results.
//!
//! Gates are grouped into ordered stages (structure, quality, acceptance).
//! A failing stage short-circuits the rest, and each report carries a score.

/// Validation settings.
pub mod config;
/// Validation engine and reports.
pub mod engine;
/// Gate trait and outcome types.
pub mod gate;
/// Built-in gates.
pub mod gates;

pub use config::{default_forbidden_patterns, ValidationConfig};
pub use engine::{FeatureValidation, ValidationEngine, ValidationReport};
pub use gate::{GateOutcome, GateStatus, ValidationGate, ValidationInput, ValidationStage};
pub use gates::{
    AcceptanceCriteriaGate, ForbiddenPatternGate, MinLengthGate, NonEmptyOutputGate, SuccessGate,
};
