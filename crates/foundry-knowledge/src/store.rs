use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::entry::{KnowledgeEntry, KnowledgeFilter, KnowledgeStats, ScoredEntry};
use async_trait::async_trait;
use foundry_core::{FoundryError, FoundryResult};
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Append-only semantic knowledge storage.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Stores an entry, computing its embedding when it has none. Returns the
    /// entry id.
    async fn store(&self, entry: KnowledgeEntry) -> FoundryResult<Uuid>;

    /// Returns up to `max_results` entries most relevant to `text`, sorted by
    /// non-increasing relevance. Ties go to the newer entry.
    async fn query(
        &self,
        text: &str,
        max_results: usize,
        filter: &KnowledgeFilter,
    ) -> FoundryResult<Vec<ScoredEntry>>;

    /// Number of stored entries.
    async fn count(&self) -> FoundryResult<usize>;

    /// Totals by source type.
    async fn stats(&self) -> FoundryResult<KnowledgeStats>;
}

#[async_trait]
impl<S: KnowledgeStore + ?Sized> KnowledgeStore for Arc<S> {
    async fn store(&self, entry: KnowledgeEntry) -> FoundryResult<Uuid> {
        (**self).store(entry).await
    }

    async fn query(
        &self,
        text: &str,
        max_results: usize,
        filter: &KnowledgeFilter,
    ) -> FoundryResult<Vec<ScoredEntry>> {
        (**self).query(text, max_results, filter).await
    }

    async fn count(&self) -> FoundryResult<usize> {
        (**self).count().await
    }

    async fn stats(&self) -> FoundryResult<KnowledgeStats> {
        (**self).stats().await
    }
}

/// In-memory store using brute-force cosine similarity.
///
/// Writers hold the lock only to append an `Arc`. Queries clone the list of
/// `Arc`s under a read lock and score outside it, so readers never block
/// writers for the duration of a scan.
pub struct InMemoryKnowledgeStore {
    embedder: Arc<dyn EmbeddingProvider>,
    entries: RwLock<Vec<Arc<KnowledgeEntry>>>,
}

impl InMemoryKnowledgeStore {
    /// Creates an empty store using `embedder` for content and queries.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// The embedding provider.
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Fills in the embedding if missing and checks its dimension.
    pub(crate) async fn prepare(&self, mut entry: KnowledgeEntry) -> FoundryResult<KnowledgeEntry> {
        if entry.embedding.is_empty() {
            entry.embedding = self.embedder.embed(&entry.content).await?;
        }
        self.check_dimension(&entry)?;
        Ok(entry)
    }

    pub(crate) fn check_dimension(&self, entry: &KnowledgeEntry) -> FoundryResult<()> {
        let expected = self.embedder.dimension();
        if entry.embedding.len() != expected {
            return Err(FoundryError::Knowledge(format!(
                "Embedding dimension mismatch for entry {}: expected {expected}, got {}",
                entry.id,
                entry.embedding.len()
            )));
        }
        Ok(())
    }

    /// Appends an already prepared entry.
    pub(crate) async fn insert_prepared(&self, entry: KnowledgeEntry) -> Uuid {
        let id = entry.id;
        self.entries.write().await.push(Arc::new(entry));
        id
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn store(&self, entry: KnowledgeEntry) -> FoundryResult<Uuid> {
        let entry = self.prepare(entry).await?;
        Ok(self.insert_prepared(entry).await)
    }

    async fn query(
        &self,
        text: &str,
        max_results: usize,
        filter: &KnowledgeFilter,
    ) -> FoundryResult<Vec<ScoredEntry>> {
        if max_results == 0 || text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(text).await?;

        let snapshot: Vec<Arc<KnowledgeEntry>> = self.entries.read().await.clone();

        let mut scored: Vec<(usize, f32, &Arc<KnowledgeEntry>)> = snapshot
            .iter()
            .enumerate()
            .filter(|(_, e)| filter.accepts(e))
            .map(|(pos, e)| {
                let relevance = cosine_similarity(&query_embedding, &e.embedding).clamp(0.0, 1.0);
                (pos, relevance, e)
            })
            .filter(|(_, relevance, _)| filter.admits(*relevance))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.2.created_at.cmp(&a.2.created_at))
                .then_with(|| b.0.cmp(&a.0))
        });
        scored.truncate(max_results);

        Ok(scored
            .into_iter()
            .map(|(_, relevance, e)| ScoredEntry {
                entry: KnowledgeEntry::clone(e),
                relevance,
            })
            .collect())
    }

    async fn count(&self) -> FoundryResult<usize> {
        Ok(self.entries.read().await.len())
    }

    async fn stats(&self) -> FoundryResult<KnowledgeStats> {
        let entries = self.entries.read().await;
        let mut stats = KnowledgeStats {
            total: entries.len(),
            ..KnowledgeStats::default()
        };
        for entry in entries.iter() {
            *stats.by_source_type.entry(entry.source_type).or_insert(0) += 1;
        }
        Ok(stats)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::embedding::LocalEmbedding;
    use crate::entry::SourceType;

    fn store() -> InMemoryKnowledgeStore {
        InMemoryKnowledgeStore::new(Arc::new(LocalEmbedding::new(128)))
    }

    #[tokio::test]
    async fn test_store_computes_embedding() {
        let s = store();
        s.store(KnowledgeEntry::new("use exponential backoff", SourceType::Pattern))
            .await
            .unwrap();
        assert_eq!(s.count().await.unwrap(), 1);
        let hits = s
            .query("use exponential backoff", 1, &KnowledgeFilter::any())
            .await
            .unwrap();
        assert_eq!(hits[0].entry.embedding.len(), 128);
        assert!(hits[0].relevance > 0.999);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected() {
        let s = store();
        let mut entry = KnowledgeEntry::new("x", SourceType::Code);
        entry.embedding = vec![0.5; 3];
        let err = s.store(entry).await.unwrap_err();
        assert!(matches!(err, FoundryError::Knowledge(_)));
        assert_eq!(s.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_results_sorted_and_truncated() {
        let s = store();
        for text in [
            "database connection pool tuning",
            "http request retry with backoff",
            "retry failed http request",
            "garden planting schedule",
        ] {
            s.store(KnowledgeEntry::new(text, SourceType::Documentation))
                .await
                .unwrap();
        }
        let hits = s
            .query("retry http request", 3, &KnowledgeFilter::any())
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        for pair in hits.windows(2) {
            assert!(pair[0].relevance >= pair[1].relevance);
        }
        assert!(hits[0].entry.content.contains("retry"));
    }

    #[tokio::test]
    async fn test_tie_prefers_newer_entry() {
        let s = store();
        let older = s
            .store(KnowledgeEntry::new("same text", SourceType::Pattern))
            .await
            .unwrap();
        let newer = s
            .store(KnowledgeEntry::new("same text", SourceType::Pattern))
            .await
            .unwrap();
        let hits = s.query("same text", 2, &KnowledgeFilter::any()).await.unwrap();
        assert_eq!(hits[0].entry.id, newer);
        assert_eq!(hits[1].entry.id, older);
    }

    #[tokio::test]
    async fn test_filter_and_floor() {
        let s = store();
        s.store(KnowledgeEntry::new("deploy with rollback", SourceType::Failure).with_tags(["devops"]))
            .await
            .unwrap();
        s.store(KnowledgeEntry::new("deploy with rollback", SourceType::Pattern).with_tags(["devops"]))
            .await
            .unwrap();
        s.store(KnowledgeEntry::new("unrelated note", SourceType::Pattern))
            .await
            .unwrap();

        let only_patterns = KnowledgeFilter::any()
            .source_types([SourceType::Pattern])
            .min_relevance(0.9);
        let hits = s.query("deploy with rollback", 10, &only_patterns).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.source_type, SourceType::Pattern);

        let tagged = KnowledgeFilter::any().tags(["devops"]);
        let hits = s.query("deploy", 10, &tagged).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_query_and_zero_limit() {
        let s = store();
        s.store(KnowledgeEntry::new("a note", SourceType::Code)).await.unwrap();
        assert!(s.query("", 5, &KnowledgeFilter::any()).await.unwrap().is_empty());
        assert!(s.query("a note", 0, &KnowledgeFilter::any()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats_by_source_type() {
        let s = store();
        s.store(KnowledgeEntry::new("pattern one", SourceType::Pattern)).await.unwrap();
        s.store(KnowledgeEntry::new("pattern two", SourceType::Pattern)).await.unwrap();
        s.store(KnowledgeEntry::new("failure one", SourceType::Failure)).await.unwrap();
        let stats = s.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_source_type.get(&SourceType::Pattern), Some(&2));
        assert_eq!(stats.by_source_type.get(&SourceType::Failure), Some(&1));
        assert_eq!(stats.by_source_type.get(&SourceType::Code), None);
    }
}
