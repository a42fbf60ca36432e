//! Semantic knowledge store used for retrieval-augmented task context.
//!
//! Entries are append-only and embedded on insert. Queries rank entries by
//! cosine similarity against the embedded query text.
//!
//! # Main types
//!
//! - [`KnowledgeStore`] — Trait for knowledge backends.
//! - [`InMemoryKnowledgeStore`] — Brute-force in-memory backend.
//! - [`FileKnowledgeStore`] — JSONL-persisted backend.
//! - [`BoundedStore`] — Timeout wrapper turning stalls into `StoreUnavailable`.
//! - [`EmbeddingProvider`] / [`LocalEmbedding`] — Pluggable text embedding.
//! - [`KnowledgeEntry`], [`KnowledgeFilter`], [`ScoredEntry`] — Records and queries.

/// Timeout-bounded store wrapper.
pub mod bounded;
/// Embedding providers and similarity.
pub mod embedding;
/// Knowledge records, filters and stats.
pub mod entry;
/// JSONL-backed store.
pub mod file;
/// Store trait and in-memory backend.
pub mod store;

pub use bounded::BoundedStore;
pub use embedding::{
    cosine_similarity, EmbeddingProvider, LocalEmbedding, DEFAULT_BIGRAM_WEIGHT, DEFAULT_PROJECTIONS,
};
pub use entry::{KnowledgeEntry, KnowledgeFilter, KnowledgeStats, ScoredEntry, SourceType};
pub use file::FileKnowledgeStore;
pub use store::{InMemoryKnowledgeStore, KnowledgeStore};
