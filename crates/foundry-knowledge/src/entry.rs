use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Where a piece of knowledge came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// A pattern that worked.
    Pattern,
    /// Reference documentation.
    Documentation,
    /// A recorded failure to avoid repeating.
    Failure,
    /// A code sample.
    Code,
}

impl SourceType {
    /// Upper-case label used in injected context headers.
    pub fn label(&self) -> &'static str {
        match self {
            SourceType::Pattern => "PATTERN",
            SourceType::Documentation => "DOCUMENTATION",
            SourceType::Failure => "FAILURE",
            SourceType::Code => "CODE",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::Pattern => write!(f, "pattern"),
            SourceType::Documentation => write!(f, "documentation"),
            SourceType::Failure => write!(f, "failure"),
            SourceType::Code => write!(f, "code"),
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pattern" => Ok(SourceType::Pattern),
            "documentation" | "docs" => Ok(SourceType::Documentation),
            "failure" => Ok(SourceType::Failure),
            "code" => Ok(SourceType::Code),
            other => Err(format!("unknown source type '{other}'")),
        }
    }
}

/// A single append-only knowledge record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// Unique id.
    pub id: Uuid,
    /// Text content.
    pub content: String,
    /// Embedding vector. Empty until the store computes it.
    #[serde(default)]
    pub embedding: Vec<f32>,
    /// Origin of the entry.
    pub source_type: SourceType,
    /// Free-form tags used for filtering.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Arbitrary metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// UTC creation time.
    pub created_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    /// Creates an entry without an embedding.
    pub fn new(content: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            embedding: Vec::new(),
            source_type,
            tags: Vec::new(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Adds tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Adds one metadata key.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Restricts which entries a query may return.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeFilter {
    /// Accept only these source types. Empty accepts all.
    #[serde(default)]
    pub source_types: Vec<SourceType>,
    /// Accept entries carrying at least one of these tags. Empty accepts all.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Drop results below this relevance.
    #[serde(default)]
    pub min_relevance: Option<f32>,
}

impl KnowledgeFilter {
    /// A filter that accepts everything.
    pub fn any() -> Self {
        Self::default()
    }

    /// Restricts to the given source types.
    pub fn source_types(mut self, types: impl IntoIterator<Item = SourceType>) -> Self {
        self.source_types = types.into_iter().collect();
        self
    }

    /// Restricts to entries sharing a tag.
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the relevance floor.
    pub fn min_relevance(mut self, floor: f32) -> Self {
        self.min_relevance = Some(floor);
        self
    }

    /// Whether `entry` passes the type and tag restrictions.
    pub fn accepts(&self, entry: &KnowledgeEntry) -> bool {
        let type_ok = self.source_types.is_empty() || self.source_types.contains(&entry.source_type);
        let tag_ok = self.tags.is_empty() || entry.tags.iter().any(|t| self.tags.contains(t));
        type_ok && tag_ok
    }

    /// Whether `relevance` clears the floor.
    pub fn admits(&self, relevance: f32) -> bool {
        self.min_relevance.map_or(true, |floor| relevance >= floor)
    }
}

/// A query hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredEntry {
    /// The matching entry.
    pub entry: KnowledgeEntry,
    /// Relevance in `[0, 1]`.
    pub relevance: f32,
}

/// Summary of what a store holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KnowledgeStats {
    /// Number of entries.
    pub total: usize,
    /// Entries per source type.
    pub by_source_type: BTreeMap<SourceType, usize>,
}
