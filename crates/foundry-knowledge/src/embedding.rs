use async_trait::async_trait;
use foundry_core::{FoundryError, FoundryResult};
use std::collections::HashMap;

/// Turns text into fixed-length vectors for similarity search.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute embedding vector for a single text.
    async fn embed(&self, text: &str) -> FoundryResult<Vec<f32>>;

    /// Compute embeddings for a batch of texts.
    async fn embed_batch(&self, texts: &[&str]) -> FoundryResult<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Dimension of the embedding vectors produced by this provider.
    fn dimension(&self) -> usize;
}

/// Deterministic hashed embedding over identifier-aware tokens and adjacent
/// token pairs.
///
/// Tokens keep `_` so `snake_case` names stay whole. Each token is weighted
/// `1 + ln(count)` and hashed into one slot per projection weight; pairs of
/// adjacent tokens are hashed the same way at `bigram_weight`. The vector is
/// L2-normalized, so an exact-text match scores 1.0.
#[derive(Debug, Clone)]
pub struct LocalEmbedding {
    dimension: usize,
    projections: Vec<f32>,
    bigram_weight: f32,
}

/// Weights of the hashed slots each feature is spread over.
pub const DEFAULT_PROJECTIONS: [f32; 3] = [1.0, 0.7, 0.5];
/// Weight of adjacent-token pairs relative to single tokens.
pub const DEFAULT_BIGRAM_WEIGHT: f32 = 0.5;

impl LocalEmbedding {
    /// Creates a provider producing `dimension`-length vectors (minimum 1).
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            projections: DEFAULT_PROJECTIONS.to_vec(),
            bigram_weight: DEFAULT_BIGRAM_WEIGHT,
        }
    }

    /// Replaces the per-slot weights. An empty list keeps a single slot at 1.0.
    pub fn with_projections(mut self, weights: impl IntoIterator<Item = f32>) -> Self {
        self.projections = weights.into_iter().collect();
        if self.projections.is_empty() {
            self.projections.push(1.0);
        }
        self
    }

    /// Weight of adjacent-token pairs; 0 turns them off.
    pub fn with_bigram_weight(mut self, weight: f32) -> Self {
        self.bigram_weight = weight.max(0.0);
        self
    }

    fn add(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        for (salt, projection) in self.projections.iter().enumerate() {
            let hash = if salt == 0 {
                fnv1a(feature)
            } else {
                fnv1a(&[feature, &[salt as u8]].concat())
            };
            vector[hash as usize % self.dimension] += weight * projection;
        }
    }
}

impl Default for LocalEmbedding {
    fn default() -> Self {
        Self::new(256)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().count() > 1)
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, text: &str) -> FoundryResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(FoundryError::Knowledge("Cannot embed empty text".to_string()));
        }

        let mut vector = vec![0.0f32; self.dimension];
        let tokens = tokenize(text);

        let mut features: HashMap<String, (f32, f32)> = HashMap::new();
        for token in &tokens {
            features.entry(token.clone()).or_insert((0.0, 1.0)).0 += 1.0;
        }
        if self.bigram_weight > 0.0 {
            for pair in tokens.windows(2) {
                let key = format!("{} {}", pair[0], pair[1]);
                features.entry(key).or_insert((0.0, self.bigram_weight)).0 += 1.0;
            }
        }

        for (feature, (count, scale)) in &features {
            let weight = (1.0 + count.ln()) * scale;
            self.add(&mut vector, feature.as_bytes(), weight);
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// FNV-1a, 32 bit.
fn fnv1a(data: &[u8]) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for &byte in data {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

/// Cosine similarity of two vectors. Returns 0.0 for mismatched lengths or
/// zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
