use crate::entry::{KnowledgeEntry, KnowledgeFilter, KnowledgeStats, ScoredEntry};
use crate::store::KnowledgeStore;
use async_trait::async_trait;
use foundry_core::{FoundryError, FoundryResult};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

/// Wraps a store so no call waits longer than `timeout`.
///
/// An expired call fails with [`FoundryError::StoreUnavailable`], which
/// callers treat as "no knowledge available".
pub struct BoundedStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: KnowledgeStore> BoundedStore<S> {
    /// Bounds every call on `inner` by `timeout`.
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T>(
        &self,
        op: &str,
        fut: impl Future<Output = FoundryResult<T>> + Send,
    ) -> FoundryResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(FoundryError::StoreUnavailable(format!(
                "{op} timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl<S: KnowledgeStore> KnowledgeStore for BoundedStore<S> {
    async fn store(&self, entry: KnowledgeEntry) -> FoundryResult<Uuid> {
        self.bounded("store", self.inner.store(entry)).await
    }

    async fn query(
        &self,
        text: &str,
        max_results: usize,
        filter: &KnowledgeFilter,
    ) -> FoundryResult<Vec<ScoredEntry>> {
        self.bounded("query", self.inner.query(text, max_results, filter))
            .await
    }

    async fn count(&self) -> FoundryResult<usize> {
        self.bounded("count", self.inner.count()).await
    }

    async fn stats(&self) -> FoundryResult<KnowledgeStats> {
        self.bounded("stats", self.inner.stats()).await
    }
}
