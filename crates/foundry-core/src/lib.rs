//! Core types and error definitions for the Foundry orchestration engine.
//!
//! This crate provides the types shared by every Foundry crate: the bus
//! message envelope and its payloads, task and result records, agent
//! self-descriptions, the retry policy, and the unified error enum.
//!
//! # Main types
//!
//! - [`FoundryError`] — Unified error enum for all Foundry subsystems.
//! - [`FoundryResult`] — Convenience alias for `Result<T, FoundryError>`.
//! - [`Message`] — Envelope exchanged over the message bus.
//! - [`TaskSpecification`] — A unit of work derived from a feature.
//! - [`ExecutionResult`] — Outcome of a single task attempt.
//! - [`EnrichedTask`] — A task plus its retrieved knowledge context.
//! - [`AgentInfo`] — What an agent reports about itself.
//! - [`RetryPolicy`] — Bounded exponential backoff.

/// Agent self-description and status.
pub mod agent;
/// Error taxonomy.
pub mod error;
/// Message envelope.
pub mod message;
/// Typed message payloads.
pub mod payload;
/// Retry and backoff policy.
pub mod retry;
/// Task, result and artifact records.
pub mod task;
pub mod topics;

pub use agent::{AgentInfo, AgentStatus};
pub use error::{FoundryError, FoundryResult};
pub use message::{Message, MessageKind, Priority};
pub use payload::{CoordinationPayload, ErrorPayload, TaskAssignment, TaskResultPayload};
pub use retry::RetryPolicy;
pub use task::{
    Artifact, ArtifactKind, EnrichedTask, ExecutionResult, TaskPhase, TaskSpecification,
    TaskStatus,
};
