#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the foundry-validation crate.
//!
//! Exercises the engine with artifact-bearing results, custom gates and
//! custom pattern sets, the way the coordinator uses it.

use foundry_core::{Artifact, ArtifactKind, ExecutionResult, FoundryError, TaskSpecification};
use foundry_validation::{
    GateOutcome, GateStatus, ValidationConfig, ValidationEngine, ValidationGate, ValidationInput,
    ValidationStage,
};
use serde_json::json;
use uuid::Uuid;

fn login_task() -> TaskSpecification {
    TaskSpecification::new(Uuid::new_v4(), "Login endpoint", "Add a login endpoint")
        .requires("coding")
        .with_acceptance_criteria(vec![
            "Passwords are hashed before storage".into(),
            "Failed attempts are rate limited".into(),
        ])
}

// ---------------------------------------------------------------------------
// 1. Artifacts
// ---------------------------------------------------------------------------

#[test]
fn artifact_content_counts_toward_acceptance() {
    let engine = ValidationEngine::from_config(&ValidationConfig::default()).unwrap();
    let result = ExecutionResult::success(json!({"summary": "login endpoint"})).with_artifact(
        Artifact::new(
            ArtifactKind::Code,
            "fn login() { let hashed = argon2(password); limiter.check(ip)?; }\n// rate limited per ip",
        ),
    );
    let report = engine.validate(&login_task(), &result);
    assert!(report.passed, "{}", report.failure_summary());
}

#[test]
fn stub_inside_artifact_fails_quality() {
    let engine = ValidationEngine::from_config(&ValidationConfig::default()).unwrap();
    let result = ExecutionResult::success(json!("login"))
        .with_artifact(Artifact::new(ArtifactKind::Code, "fn login() { unimplemented!() }"));
    let report = engine.validate(&login_task(), &result);
    assert!(!report.passed);
    let failed: Vec<_> = report.failures().map(|o| o.gate.as_str()).collect();
    assert_eq!(failed, vec!["forbidden_patterns"]);
}

// ---------------------------------------------------------------------------
// 2. Configuration
// ---------------------------------------------------------------------------

#[test]
fn custom_patterns_replace_defaults() {
    let config = ValidationConfig {
        forbidden_patterns: vec![r"(?i)\bxxx\b".into()],
        check_acceptance: false,
        ..ValidationConfig::default()
    };
    let engine = ValidationEngine::from_config(&config).unwrap();
    let task = login_task();

    let with_todo = ExecutionResult::success(json!("TODO is allowed here"));
    assert!(engine.validate(&task, &with_todo).passed);

    let with_marker = ExecutionResult::success(json!("XXX marker"));
    assert!(!engine.validate(&task, &with_marker).passed);
}

#[test]
fn invalid_pattern_rejected_at_construction() {
    let config = ValidationConfig {
        forbidden_patterns: vec!["[".into()],
        ..ValidationConfig::default()
    };
    let err = ValidationEngine::from_config(&config).unwrap_err();
    assert!(matches!(err, FoundryError::Config(msg) if msg.contains("forbidden_patterns")));
}

#[test]
fn config_deserializes_with_defaults() {
    let config: ValidationConfig = serde_json::from_value(json!({"min_output_chars": 20})).unwrap();
    assert_eq!(config.min_output_chars, 20);
    assert_eq!(config.min_keyword_len, 4);
    assert!(config.check_acceptance);
    assert!(!config.forbidden_patterns.is_empty());
}

// ---------------------------------------------------------------------------
// 3. Custom gates
// ---------------------------------------------------------------------------

struct RequiresTestArtifact;

impl ValidationGate for RequiresTestArtifact {
    fn name(&self) -> &str {
        "has_test_artifact"
    }

    fn stage(&self) -> ValidationStage {
        ValidationStage::Structure
    }

    fn check(&self, input: &ValidationInput<'_>) -> GateOutcome {
        if input.result.artifacts.iter().any(|a| a.kind == ArtifactKind::Test) {
            GateOutcome::pass(self.name(), self.stage())
        } else {
            GateOutcome::fail(self.name(), self.stage(), "no test artifact")
        }
    }
}

#[test]
fn custom_structure_gate_short_circuits_builtins() {
    let engine = ValidationEngine::from_config(&ValidationConfig::default())
        .unwrap()
        .with_gate(RequiresTestArtifact);
    let result = ExecutionResult::success(json!("hashed passwords, rate limited attempts"));
    let report = engine.validate(&login_task(), &result);

    assert!(!report.passed);
    let quality_and_later = report
        .outcomes
        .iter()
        .filter(|o| o.stage != ValidationStage::Structure);
    for outcome in quality_and_later {
        assert_eq!(outcome.status, GateStatus::Skip);
    }
}

#[test]
fn feature_validation_aggregates_mean_score() {
    let engine = ValidationEngine::from_config(&ValidationConfig::default()).unwrap();
    let task = login_task();
    let ok = ExecutionResult::success(json!("passwords hashed; attempts rate limited"));
    let agg = engine.validate_all([(&task, &ok), (&task, &ok)]);
    assert!(agg.passed);
    assert!((agg.score - 1.0).abs() < f64::EPSILON);
}
