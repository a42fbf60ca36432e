//! Built-in validation gates.

use crate::gate::{GateOutcome, ValidationGate, ValidationInput, ValidationStage};
use foundry_core::{FoundryError, FoundryResult};
use regex::Regex;

/// The executor reported success without errors.
#[derive(Debug, Default)]
pub struct SuccessGate;

impl ValidationGate for SuccessGate {
    fn name(&self) -> &str {
        "success"
    }

    fn stage(&self) -> ValidationStage {
        ValidationStage::Structure
    }

    fn check(&self, input: &ValidationInput<'_>) -> GateOutcome {
        if !input.result.success {
            let detail = if input.result.errors.is_empty() {
                "execution reported failure".to_string()
            } else {
                input.result.errors.join("; ")
            };
            return GateOutcome::fail(self.name(), self.stage(), detail);
        }
        if !input.result.errors.is_empty() {
            return GateOutcome::fail(
                self.name(),
                self.stage(),
                format!("success reported with errors: {}", input.result.errors.join("; ")),
            );
        }
        GateOutcome::pass(self.name(), self.stage())
    }
}

/// The result carries output or at least one artifact.
#[derive(Debug, Default)]
pub struct NonEmptyOutputGate;

impl ValidationGate for NonEmptyOutputGate {
    fn name(&self) -> &str {
        "non_empty_output"
    }

    fn stage(&self) -> ValidationStage {
        ValidationStage::Structure
    }

    fn check(&self, input: &ValidationInput<'_>) -> GateOutcome {
        if input.result.output.is_null() && input.result.artifacts.is_empty() {
            GateOutcome::fail(self.name(), self.stage(), "no output and no artifacts")
        } else {
            GateOutcome::pass(self.name(), self.stage())
        }
    }
}

/// Produced text is at least `min_chars` long.
#[derive(Debug)]
pub struct MinLengthGate {
    min_chars: usize,
}

impl MinLengthGate {
    /// Gate requiring at least `min_chars` characters after trimming.
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }
}

impl ValidationGate for MinLengthGate {
    fn name(&self) -> &str {
        "min_length"
    }

    fn stage(&self) -> ValidationStage {
        ValidationStage::Quality
    }

    fn check(&self, input: &ValidationInput<'_>) -> GateOutcome {
        let len = input.text.trim().chars().count();
        if len < self.min_chars {
            GateOutcome::fail(
                self.name(),
                self.stage(),
                format!("output has {len} characters, need at least {}", self.min_chars),
            )
        } else {
            GateOutcome::pass(self.name(), self.stage())
        }
    }
}

/// Fails when produced text matches any placeholder or vague-language pattern.
pub struct ForbiddenPatternGate {
    patterns: Vec<(Regex, String)>,
}

impl std::fmt::Debug for ForbiddenPatternGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForbiddenPatternGate")
            .field("patterns", &self.patterns.iter().map(|(_, s)| s).collect::<Vec<_>>())
            .finish()
    }
}

impl ForbiddenPatternGate {
    /// Compiles `patterns`. An invalid regex is a configuration error.
    pub fn new(patterns: &[String]) -> FoundryResult<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let regex = Regex::new(pattern).map_err(|e| {
                FoundryError::Config(format!(
                    "invalid regex in validation.forbidden_patterns: '{pattern}' - {e}"
                ))
            })?;
            compiled.push((regex, pattern.clone()));
        }
        Ok(Self { patterns: compiled })
    }
}

impl ValidationGate for ForbiddenPatternGate {
    fn name(&self) -> &str {
        "forbidden_patterns"
    }

    fn stage(&self) -> ValidationStage {
        ValidationStage::Quality
    }

    fn check(&self, input: &ValidationInput<'_>) -> GateOutcome {
        let mut hits = Vec::new();
        for (lineno, line) in input.text.lines().enumerate() {
            for (regex, source) in &self.patterns {
                if regex.is_match(line) {
                    hits.push(format!("line {}: matches '{source}'", lineno + 1));
                }
            }
        }
        if hits.is_empty() {
            GateOutcome::pass(self.name(), self.stage())
        } else {
            GateOutcome::fail(self.name(), self.stage(), hits.join(", "))
        }
    }
}

const STOPWORDS: &[&str] = &[
    "that", "this", "with", "from", "have", "will", "must", "should", "when", "then", "than",
    "into", "each", "every", "been", "were", "which", "their", "there", "they", "what", "does",
];

/// Every acceptance criterion has at least one significant keyword present
/// in the produced text. Skipped when the task has no criteria.
#[derive(Debug)]
pub struct AcceptanceCriteriaGate {
    min_keyword_len: usize,
}

impl AcceptanceCriteriaGate {
    /// Gate ignoring criterion words shorter than `min_keyword_len`.
    pub fn new(min_keyword_len: usize) -> Self {
        Self { min_keyword_len }
    }

    fn keywords(&self, criterion: &str) -> Vec<String> {
        criterion
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() >= self.min_keyword_len)
            .map(str::to_lowercase)
            .filter(|w| !STOPWORDS.contains(&w.as_str()))
            .collect()
    }
}

impl ValidationGate for AcceptanceCriteriaGate {
    fn name(&self) -> &str {
        "acceptance_criteria"
    }

    fn stage(&self) -> ValidationStage {
        ValidationStage::Acceptance
    }

    fn check(&self, input: &ValidationInput<'_>) -> GateOutcome {
        if input.task.acceptance_criteria.is_empty() {
            return GateOutcome::skip(self.name(), self.stage(), "no acceptance criteria");
        }
        let haystack = input.text.to_lowercase();
        let uncovered: Vec<&str> = input
            .task
            .acceptance_criteria
            .iter()
            .filter(|criterion| {
                let keywords = self.keywords(criterion);
                !keywords.is_empty() && !keywords.iter().any(|k| haystack.contains(k.as_str()))
            })
            .map(String::as_str)
            .collect();
        if uncovered.is_empty() {
            GateOutcome::pass(self.name(), self.stage())
        } else {
            GateOutcome::fail(
                self.name(),
                self.stage(),
                format!("criteria not addressed: {}", uncovered.join(" | ")),
            )
        }
    }
}
