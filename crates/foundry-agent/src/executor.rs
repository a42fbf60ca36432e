use crate::roles::AgentRole;
use async_trait::async_trait;
use foundry_core::{Artifact, EnrichedTask, ExecutionResult, FoundryResult};
use std::sync::Arc;
use std::time::Instant;

/// Capability-specific work performed for an enriched task.
///
/// This is the only interface the runtime knows about an agent's behaviour.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Executes the task. An `Err` is converted to a failed result by the
    /// runtime.
    async fn run(&self, task: &EnrichedTask) -> FoundryResult<ExecutionResult>;
}

/// Opaque text-generation capability (an LLM call or a stand-in).
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Produces text for `prompt`.
    async fn generate(&self, prompt: &str) -> FoundryResult<String>;
}

/// Heading that opens the task section of a prompt.
pub const TASK_SECTION: &str = "## Task";
/// Heading that opens the context section of a prompt.
pub const CONTEXT_SECTION: &str = "## Context";

/// Executes tasks by prompting a [`TextGenerator`] with a role-specific
/// prompt and wrapping the generated text as an artifact.
pub struct PromptExecutor {
    role: AgentRole,
    generator: Arc<dyn TextGenerator>,
}

impl PromptExecutor {
    pub fn new(role: AgentRole, generator: Arc<dyn TextGenerator>) -> Self {
        Self { role, generator }
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    /// Builds the full prompt: role preamble, task section, then context.
    pub fn build_prompt(&self, enriched: &EnrichedTask) -> String {
        let task = &enriched.task;
        let mut prompt = String::new();
        prompt.push_str(self.role.system_prompt());
        prompt.push('\n');
        prompt.push_str(TASK_SECTION);
        prompt.push('\n');
        prompt.push_str(&format!("Title: {}\n", task.title));
        prompt.push_str(&format!("Description: {}\n", task.description));
        if !task.requirements.is_empty() {
            prompt.push_str("Requirements:\n");
            for req in &task.requirements {
                prompt.push_str(&format!("- {req}\n"));
            }
        }
        if !task.acceptance_criteria.is_empty() {
            prompt.push_str("Acceptance criteria:\n");
            for criterion in &task.acceptance_criteria {
                prompt.push_str(&format!("- {criterion}\n"));
            }
        }
        if !enriched.context.is_empty() {
            prompt.push('\n');
            prompt.push_str(CONTEXT_SECTION);
            prompt.push('\n');
            prompt.push_str(&enriched.context);
        }
        prompt
    }
}

#[async_trait]
impl TaskExecutor for PromptExecutor {
    async fn run(&self, task: &EnrichedTask) -> FoundryResult<ExecutionResult> {
        let started = Instant::now();
        let prompt = self.build_prompt(task);
        let text = self.generator.generate(&prompt).await?;
        let elapsed = started.elapsed().as_millis() as u64;

        if text.trim().is_empty() {
            return Ok(ExecutionResult::failure(["generator returned empty output"])
                .with_execution_time(elapsed));
        }

        Ok(ExecutionResult::success(serde_json::json!({
            "role": self.role.to_string(),
            "summary": first_line(&text),
        }))
        .with_artifact(Artifact::new(self.role.artifact_kind(), text))
        .with_execution_time(elapsed))
    }
}

fn first_line(text: &str) -> String {
    text.lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Deterministic offline generator that restates the task section of the
/// prompt. Used by the command-line demo and tests.
#[derive(Debug, Default, Clone)]
pub struct TemplateGenerator;

#[async_trait]
impl TextGenerator for TemplateGenerator {
    async fn generate(&self, prompt: &str) -> FoundryResult<String> {
        let task = prompt
            .split_once(TASK_SECTION)
            .map(|(_, rest)| rest)
            .unwrap_or(prompt);
        let task = task
            .split_once(CONTEXT_SECTION)
            .map_or(task, |(before, _)| before);
        Ok(format!("Completed work item.\n{}", task.trim()))
    }
}
