//! Task coordination for Foundry.
//!
//! The coordinator owns every feature and its task graph. It decomposes
//! features through a [`Planner`], dispatches ready tasks to capable agents
//! over the message bus, validates results, retries failures with backoff,
//! reassigns work from agents that stop heartbeating, and drives each feature
//! through `planning -> implementation -> review -> deployment -> completed`.
//!
//! # Main types
//!
//! - [`Coordinator`] / [`CoordinatorHandle`] — The coordinator actor and its
//!   cloneable command handle.
//! - [`TaskGraph`] — Dependency-checked task set of one feature.
//! - [`AgentRegistry`] — Agent liveness, reservations and failure history.
//! - [`Planner`] — Feature decomposition interface.
//! - [`Feature`] / [`FeatureState`] — Feature records and their state machine.

/// Coordinator settings.
pub mod config;
/// The coordinator actor.
pub mod coordinator;
/// Feature decomposition.
pub mod planner;
/// Agent bookkeeping.
pub mod registry;
/// Per-feature task dependency graph.
pub mod task_graph;
/// Feature, request and progress event types.
pub mod types;

pub use config::{CoordinatorConfig, SelectionPolicy};
pub use coordinator::{Coordinator, CoordinatorBuilder, CoordinatorHandle};
pub use planner::{DefaultPlanner, Planner};
pub use registry::{AgentRecord, AgentRegistry};
pub use task_graph::TaskGraph;
pub use types::{
    Feature, FeatureRequest, FeatureState, ProgressEvent, ProgressEventKind, SubmitResponse,
};
