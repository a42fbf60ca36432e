//! Asynchronous topic-based message bus connecting the coordinator and agents.
//!
//! The bus supports fan-out publish/subscribe, point-to-point sends addressed
//! to an endpoint, and broadcasts on the coordination topic. Every message is
//! also mirrored to [`foundry_core::topics::ALL_MESSAGES`] for auditing.
//!
//! # Main types
//!
//! - [`MessageBus`] — Cloneable handle to a shared in-process bus.
//! - [`Subscription`] — Receiver for one topic; unsubscribes on drop.
//! - [`Delivery`] — Outcome of a point-to-point send.
//! - [`Deduplicator`] — Bounded seen-id set for idempotent handlers.
//! - [`BusConfig`] — Bus tuning.

/// Bus implementation and subscriptions.
pub mod bus;
/// Bus configuration.
pub mod config;
/// Message-id deduplication.
pub mod dedup;

pub use bus::{BusStats, Delivery, MessageBus, Subscription};
pub use config::BusConfig;
pub use dedup::Deduplicator;
