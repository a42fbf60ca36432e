//! Agent runtime: hosts a worker endpoint on the message bus, injects
//! retrieved knowledge into each task, and executes it through a pluggable
//! [`TaskExecutor`].
//!
//! # Main types
//!
//! - [`AgentRuntime`] — Lifecycle, heartbeat and event loop for one agent.
//! - [`ContextInjector`] — Retrieval-augmented task enrichment.
//! - [`TaskExecutor`] — Capability-specific execution interface.
//! - [`PromptExecutor`] / [`TextGenerator`] — Role-prompted text generation.
//! - [`AgentRole`] — Built-in roles with default capabilities and prompts.

/// Runtime and context configuration.
pub mod config;
/// Knowledge-backed task enrichment.
pub mod context;
/// Executor and generator traits plus the prompt-based executor.
pub mod executor;
/// Built-in agent roles.
pub mod roles;
/// Agent lifecycle and message handling.
pub mod runtime;

pub use config::{ContextConfig, RuntimeConfig};
pub use context::ContextInjector;
pub use executor::{PromptExecutor, TaskExecutor, TemplateGenerator, TextGenerator};
pub use roles::AgentRole;
pub use runtime::{AgentRuntime, AgentRuntimeBuilder};
