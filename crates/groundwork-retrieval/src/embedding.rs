use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use groundwork_core::{GroundworkError, GroundworkResult};

use crate::config::{EmbeddingBackend, EmbeddingConfig};

/// Trait for computing text embeddings (vector representations).
///
/// Implementations must be deterministic for a fixed model and input and
/// return vectors of [`dimension`](EmbeddingProvider::dimension) length for
/// any non-empty text. Calls may be slow or remote; callers batch them only
/// across independent chunks.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute embedding vector for a single text.
    async fn embed(&self, text: &str) -> GroundworkResult<Vec<f32>>;

    /// Compute embeddings for a batch of texts, in input order.
    async fn embed_batch(&self, texts: &[&str]) -> GroundworkResult<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Dimension of the embedding vectors produced by this provider.
    fn dimension(&self) -> usize;
}

/// Build the provider selected by `config`.
pub fn build_provider(config: &EmbeddingConfig) -> GroundworkResult<Arc<dyn EmbeddingProvider>> {
    if config.dimension == 0 {
        return Err(GroundworkError::Config(
            "embedding dimension must be at least 1".to_string(),
        ));
    }
    match config.provider {
        EmbeddingBackend::Local => Ok(Arc::new(LocalEmbedding::new(config.dimension))),
        #[cfg(feature = "http-embeddings")]
        EmbeddingBackend::Http => Ok(Arc::new(crate::http_embedding::HttpEmbedding::new(
            config,
        )?)),
        #[cfg(not(feature = "http-embeddings"))]
        EmbeddingBackend::Http => Err(GroundworkError::Config(
            "the http embedding provider requires the `http-embeddings` feature".to_string(),
        )),
    }
}

/// Hashed bag-of-words embedding that runs in-process.
///
/// Each lowercase word is hashed (FNV-1a) into three buckets of a fixed-size
/// vector with a hash-derived sign, weighted by term frequency, then the
/// vector is L2-normalized. Texts sharing vocabulary land close together;
/// there is no notion of synonyms. Good for offline builds and tests; use a
/// model-backed provider for real corpora.
pub struct LocalEmbedding {
    dimension: usize,
}

impl LocalEmbedding {
    /// Create a provider producing `dimension`-wide vectors (at least 1).
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for LocalEmbedding {
    /// 300 dimensions, the width of common fastText sentence vectors.
    fn default() -> Self {
        Self::new(300)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, text: &str) -> GroundworkResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(GroundworkError::Embedding(
                "cannot embed empty text".to_string(),
            ));
        }

        let mut vector = vec![0.0f32; self.dimension];

        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() > 1)
            .collect();
        if words.is_empty() {
            return Ok(vector);
        }

        let mut freq: HashMap<&str, f32> = HashMap::new();
        for word in &words {
            *freq.entry(word).or_insert(0.0) += 1.0;
        }

        let total = words.len() as f32;
        for (word, count) in &freq {
            let tf = count / total;
            for (salt, weight) in [(0u8, 1.0f32), (1, 0.7), (2, 0.5)] {
                let hash = fnv1a(word.as_bytes(), salt);
                let bucket = (hash as usize) % self.dimension;
                let sign = if hash & 0x8000_0000 == 0 { 1.0 } else { -1.0 };
                vector[bucket] += sign * weight * tf;
            }
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

/// FNV-1a over `data` followed by one salt byte.
fn fnv1a(data: &[u8], salt: u8) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for &byte in data.iter().chain(std::iter::once(&salt)) {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}
