use crate::embedding::EmbeddingProvider;
use crate::entry::{KnowledgeEntry, KnowledgeFilter, KnowledgeStats, ScoredEntry};
use crate::store::{InMemoryKnowledgeStore, KnowledgeStore};
use async_trait::async_trait;
use foundry_core::{FoundryError, FoundryResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Knowledge store persisted as an append-only JSONL file.
///
/// All entries are loaded into memory on open. Each `store` appends one line
/// before the entry becomes visible to queries.
pub struct FileKnowledgeStore {
    path: PathBuf,
    inner: InMemoryKnowledgeStore,
    writer: Mutex<()>,
}

impl FileKnowledgeStore {
    /// Opens (or creates) the store at `path`.
    ///
    /// Malformed lines are skipped with a warning; entries whose embedding
    /// dimension does not match `embedder` are rejected.
    pub async fn open(
        path: impl Into<PathBuf>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> FoundryResult<Self> {
        let path = path.into();
        let inner = InMemoryKnowledgeStore::new(embedder);

        if path.exists() {
            let data = tokio::fs::read_to_string(&path).await?;
            let mut loaded = 0usize;
            for (lineno, line) in data.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let entry: KnowledgeEntry = match serde_json::from_str(line) {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(path = %path.display(), line = lineno + 1, error = %e, "Skipping malformed knowledge entry");
                        continue;
                    }
                };
                inner.check_dimension(&entry)?;
                inner.insert_prepared(entry).await;
                loaded += 1;
            }
            info!(path = %path.display(), entries = loaded, "Loaded knowledge store");
        } else if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        Ok(Self {
            path,
            inner,
            writer: Mutex::new(()),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, entry: &KnowledgeEntry) -> FoundryResult<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                FoundryError::Knowledge(format!(
                    "Failed to open knowledge file {}: {e}",
                    self.path.display()
                ))
            })?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl KnowledgeStore for FileKnowledgeStore {
    async fn store(&self, entry: KnowledgeEntry) -> FoundryResult<Uuid> {
        let entry = self.inner.prepare(entry).await?;
        let _guard = self.writer.lock().await;
        self.append(&entry).await?;
        Ok(self.inner.insert_prepared(entry).await)
    }

    async fn query(
        &self,
        text: &str,
        max_results: usize,
        filter: &KnowledgeFilter,
    ) -> FoundryResult<Vec<ScoredEntry>> {
        self.inner.query(text, max_results, filter).await
    }

    async fn count(&self) -> FoundryResult<usize> {
        self.inner.count().await
    }

    async fn stats(&self) -> FoundryResult<KnowledgeStats> {
        self.inner.stats().await
    }
}
