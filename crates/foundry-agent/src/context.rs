use crate::config::ContextConfig;
use foundry_core::{EnrichedTask, TaskSpecification};
use foundry_knowledge::{KnowledgeFilter, KnowledgeStore, ScoredEntry};
use std::sync::Arc;
use tracing::{debug, warn};

/// Enriches tasks with knowledge retrieved for them before execution.
///
/// Retrieval is best effort: an unavailable or slow store yields an empty
/// context and the task runs without augmentation.
pub struct ContextInjector {
    store: Option<Arc<dyn KnowledgeStore>>,
    config: ContextConfig,
}

impl ContextInjector {
    pub fn new(store: Arc<dyn KnowledgeStore>, config: ContextConfig) -> Self {
        Self {
            store: Some(store),
            config,
        }
    }

    /// An injector that never adds context.
    pub fn disabled() -> Self {
        Self {
            store: None,
            config: ContextConfig::default(),
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Query text used to retrieve context for `task`.
    pub fn query_for(task: &TaskSpecification) -> String {
        let mut query = format!("{}\n{}", task.title, task.description);
        if !task.required_capabilities.is_empty() {
            query.push('\n');
            let caps: Vec<&str> = task
                .required_capabilities
                .iter()
                .map(String::as_str)
                .collect();
            query.push_str(&caps.join(" "));
        }
        query
    }

    pub async fn enrich(&self, task: TaskSpecification) -> EnrichedTask {
        let Some(store) = &self.store else {
            return EnrichedTask::bare(task);
        };

        let query = Self::query_for(&task);
        let filter = KnowledgeFilter::any().min_relevance(self.config.min_relevance);
        let lookup = store.query(&query, self.config.max_results, &filter);

        let hits = match tokio::time::timeout(self.config.query_timeout(), lookup).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                warn!(task_id = %task.id, error = %e, "Knowledge query failed, continuing without context");
                return EnrichedTask::bare(task);
            }
            Err(_) => {
                warn!(
                    task_id = %task.id,
                    timeout_ms = self.config.query_timeout_ms,
                    "Knowledge query timed out, continuing without context"
                );
                return EnrichedTask::bare(task);
            }
        };

        let (context, used) = assemble(&hits, self.config.max_chars);
        debug!(task_id = %task.id, retrieved = hits.len(), injected = used, "Context assembled");
        EnrichedTask {
            task,
            context,
            context_sources: used,
        }
    }
}

/// Concatenates hits in the order given (highest relevance first) until the
/// next block would exceed `max_chars` characters. A top hit that alone is
/// over budget is cut at the budget instead of dropped.
fn assemble(hits: &[ScoredEntry], max_chars: usize) -> (String, usize) {
    let mut context = String::new();
    let mut chars = 0;
    let mut used = 0;
    for hit in hits {
        let block = format!(
            "--- {} ---\n{}\n",
            hit.entry.source_type.label(),
            hit.entry.content
        );
        let len = block.chars().count();
        if chars + len > max_chars {
            if used == 0 && max_chars > 0 {
                context.extend(block.chars().take(max_chars));
                used = 1;
            }
            break;
        }
        context.push_str(&block);
        chars += len;
        used += 1;
    }
    (context, used)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use foundry_core::{FoundryError, FoundryResult};
    use foundry_knowledge::{
        InMemoryKnowledgeStore, KnowledgeEntry, KnowledgeStats, LocalEmbedding, SourceType,
    };
    use uuid::Uuid;

    fn task(title: &str, description: &str) -> TaskSpecification {
        TaskSpecification::new(Uuid::new_v4(), title, description).requires("coding")
    }

    struct DownStore;

    #[async_trait]
    impl KnowledgeStore for DownStore {
        async fn store(&self, _entry: KnowledgeEntry) -> FoundryResult<Uuid> {
            Err(FoundryError::StoreUnavailable("down".into()))
        }
        async fn query(
            &self,
            _text: &str,
            _max: usize,
            _filter: &KnowledgeFilter,
        ) -> FoundryResult<Vec<ScoredEntry>> {
            Err(FoundryError::StoreUnavailable("down".into()))
        }
        async fn count(&self) -> FoundryResult<usize> {
            Ok(0)
        }
        async fn stats(&self) -> FoundryResult<KnowledgeStats> {
            Ok(KnowledgeStats::default())
        }
    }

    struct SlowStore;

    #[async_trait]
    impl KnowledgeStore for SlowStore {
        async fn store(&self, _entry: KnowledgeEntry) -> FoundryResult<Uuid> {
            Ok(Uuid::new_v4())
        }
        async fn query(
            &self,
            _text: &str,
            _max: usize,
            _filter: &KnowledgeFilter,
        ) -> FoundryResult<Vec<ScoredEntry>> {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok(Vec::new())
        }
        async fn count(&self) -> FoundryResult<usize> {
            Ok(0)
        }
        async fn stats(&self) -> FoundryResult<KnowledgeStats> {
            Ok(KnowledgeStats::default())
        }
    }

    #[test]
    fn test_query_includes_title_description_and_capabilities() {
        let q = ContextInjector::query_for(&task("Login", "Add a login endpoint"));
        assert!(q.contains("Login"));
        assert!(q.contains("login endpoint"));
        assert!(q.ends_with("coding"));
    }

    #[tokio::test]
    async fn test_relevant_entries_are_injected_in_order() {
        let store = Arc::new(InMemoryKnowledgeStore::new(Arc::new(LocalEmbedding::default())));
        let t = task("Login endpoint", "Add a login endpoint");
        let query = ContextInjector::query_for(&t);
        store
            .store(KnowledgeEntry::new(query.clone(), SourceType::Pattern))
            .await
            .unwrap();
        store
            .store(KnowledgeEntry::new("gardening tips for spring", SourceType::Documentation))
            .await
            .unwrap();

        let injector = ContextInjector::new(store, ContextConfig::default());
        let enriched = injector.enrich(t).await;
        assert_eq!(enriched.context_sources, 1);
        assert!(enriched.context.starts_with("--- PATTERN ---\n"));
        assert!(!enriched.context.contains("gardening"));
    }

    #[tokio::test]
    async fn test_budget_drops_lowest_ranked_first() {
        let store = Arc::new(InMemoryKnowledgeStore::new(Arc::new(LocalEmbedding::default())));
        let t = task("Cache layer", "Add a cache layer");
        let query = ContextInjector::query_for(&t);
        // Exact match ranks first; the padded copy ranks below it.
        store
            .store(KnowledgeEntry::new(query.clone(), SourceType::Pattern))
            .await
            .unwrap();
        store
            .store(KnowledgeEntry::new(
                format!("{query} {query} extra"),
                SourceType::Code,
            ))
            .await
            .unwrap();

        let config = ContextConfig {
            max_chars: query.len() + 40,
            min_relevance: 0.0,
            ..ContextConfig::default()
        };
        let injector = ContextInjector::new(store, config.clone());
        let enriched = injector.enrich(t).await;
        assert_eq!(enriched.context_sources, 1);
        assert!(enriched.context.chars().count() <= config.max_chars);
        assert!(enriched.context.contains("--- PATTERN ---"));
    }

    fn hit(content: &str, source: SourceType) -> ScoredEntry {
        ScoredEntry {
            entry: KnowledgeEntry::new(content, source),
            relevance: 1.0,
        }
    }

    #[test]
    fn test_oversized_top_hit_is_truncated() {
        let long = "ü".repeat(100);
        let hits = vec![hit(&long, SourceType::Pattern), hit("short", SourceType::Code)];
        let (context, used) = assemble(&hits, 30);
        assert_eq!(used, 1);
        assert_eq!(context.chars().count(), 30);
        assert!(context.starts_with("--- PATTERN ---\nü"));
        assert!(!context.contains("short"));
    }

    #[test]
    fn test_budget_counts_chars_not_bytes() {
        // 2-byte chars: the block fits by char count but not by byte count.
        let content = "é".repeat(20);
        let block_chars = "--- CODE ---\n".chars().count() + 20 + 1;
        let (context, used) = assemble(&[hit(&content, SourceType::Code)], block_chars);
        assert_eq!(used, 1);
        assert!(context.ends_with(&format!("{content}\n")));
        assert!(context.len() > block_chars);
    }

    #[test]
    fn test_zero_budget_gives_empty_context() {
        let (context, used) = assemble(&[hit("anything", SourceType::Code)], 0);
        assert!(context.is_empty());
        assert_eq!(used, 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_degrades_to_empty_context() {
        let injector = ContextInjector::new(Arc::new(DownStore), ContextConfig::default());
        let enriched = injector.enrich(task("a", "b")).await;
        assert!(enriched.context.is_empty());
        assert_eq!(enriched.context_sources, 0);
    }

    #[tokio::test]
    async fn test_slow_store_times_out_to_empty_context() {
        let config = ContextConfig {
            query_timeout_ms: 20,
            ..ContextConfig::default()
        };
        let injector = ContextInjector::new(Arc::new(SlowStore), config);
        let started = std::time::Instant::now();
        let enriched = injector.enrich(task("a", "b")).await;
        assert!(enriched.context.is_empty());
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }
}
