use std::collections::BTreeMap;

use groundwork_core::{GroundworkError, GroundworkResult};
use serde::{Deserialize, Serialize};

/// A contiguous span of normalized document text together with its embedding
/// and provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Top-level category tag (the company directory the document came from).
    pub company: String,
    /// Sub-tag (the category directory under the company).
    pub category: String,
    /// File name of the source document.
    pub source_file: String,
    /// 0-based position of this chunk within its source document.
    pub chunk_index: usize,
    /// The chunk text. Never empty once stored.
    pub text: String,
    /// Fixed-length embedding of `text`.
    pub embedding: Vec<f32>,
}

/// The in-memory embedding index: every chunk of a corpus, in insertion order.
///
/// Each row owns both its vector and its metadata, so the two can never drift
/// apart. The vector dimension is fixed by the first appended chunk. Rows are
/// never removed or reordered; a row's index is its identity for tie-breaking
/// and for the on-disk layout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingIndex {
    dimension: Option<usize>,
    chunks: Vec<Chunk>,
}

impl EmbeddingIndex {
    /// Create an empty index with no established dimension.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk and return its row index.
    ///
    /// Fails with [`GroundworkError::DimensionMismatch`] when the vector width
    /// differs from the established dimension, and with
    /// [`GroundworkError::InvalidChunk`] for empty text, an empty vector, or
    /// non-finite vector components. A failed append leaves the index unchanged.
    pub fn append(&mut self, chunk: Chunk) -> GroundworkResult<usize> {
        if chunk.text.trim().is_empty() {
            return Err(GroundworkError::InvalidChunk(format!(
                "{} #{}: empty text",
                chunk.source_file, chunk.chunk_index
            )));
        }
        if chunk.embedding.is_empty() {
            return Err(GroundworkError::InvalidChunk(format!(
                "{} #{}: empty embedding",
                chunk.source_file, chunk.chunk_index
            )));
        }
        if chunk.embedding.iter().any(|v| !v.is_finite()) {
            return Err(GroundworkError::InvalidChunk(format!(
                "{} #{}: embedding contains non-finite values",
                chunk.source_file, chunk.chunk_index
            )));
        }
        match self.dimension {
            Some(expected) if expected != chunk.embedding.len() => {
                return Err(GroundworkError::DimensionMismatch {
                    expected,
                    actual: chunk.embedding.len(),
                });
            }
            Some(_) => {}
            None => self.dimension = Some(chunk.embedding.len()),
        }

        self.chunks.push(chunk);
        Ok(self.chunks.len() - 1)
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The established vector dimension, if any chunk has been appended.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// The chunk at `row`.
    pub fn get(&self, row: usize) -> Option<&Chunk> {
        self.chunks.get(row)
    }

    /// All chunks in row order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Iterate over chunks in row order.
    pub fn iter(&self) -> std::slice::Iter<'_, Chunk> {
        self.chunks.iter()
    }

    /// Chunk counts per `(company, category)`, sorted by key.
    pub fn category_counts(&self) -> BTreeMap<(String, String), usize> {
        let mut counts = BTreeMap::new();
        for chunk in &self.chunks {
            *counts
                .entry((chunk.company.clone(), chunk.category.clone()))
                .or_insert(0) += 1;
        }
        counts
    }
}

impl<'a> IntoIterator for &'a EmbeddingIndex {
    type Item = &'a Chunk;
    type IntoIter = std::slice::Iter<'a, Chunk>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.iter()
    }
}
