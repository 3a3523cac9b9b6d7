//! Document ingestion, embedding index, and top-K semantic retrieval.
//!
//! Documents are extracted to normalized text, split into sentence-aligned
//! chunks, and embedded into fixed-length vectors. The resulting
//! [`EmbeddingIndex`] is persisted as a NumPy matrix plus a CSV metadata
//! table, and served by a [`Retriever`] that answers a text query with the
//! most similar stored chunks.
//!
//! # Main types
//!
//! - [`EmbeddingProvider`]: Trait for turning text into vectors.
//! - [`LocalEmbedding`]: In-process hashed bag-of-words provider.
//! - [`Chunker`]: Sentence-aligned, length-bounded text splitter.
//! - [`EmbeddingIndex`]: Ordered chunk store with `.npy`/CSV persistence.
//! - [`SimilaritySearch`]: Exact cosine top-K search.
//! - [`Ingestor`]: Concurrent batch ingestion from a directory tree.
//! - [`Retriever`]: Query facade returning ranked results or a context string.

/// Sentence-aligned text chunking.
pub mod chunker;
/// Library configuration types.
pub mod config;
/// Embedding provider trait and local implementation.
pub mod embedding;
/// Text extraction and normalization.
pub mod extract;
/// OpenAI-compatible remote embedding provider.
#[cfg(feature = "http-embeddings")]
pub mod http_embedding;
/// Batch ingestion of a document tree.
pub mod ingest;
/// On-disk index format.
pub mod persist;
/// Query facade.
pub mod retriever;
/// Cosine similarity and top-K selection.
pub mod search;
/// In-memory chunk store.
pub mod store;

pub use chunker::{Chunker, DEFAULT_MAX_CHARS};
pub use config::{ChunkingConfig, EmbeddingBackend, EmbeddingConfig, IngestConfig, RetrievalConfig};
pub use embedding::{build_provider, EmbeddingProvider, LocalEmbedding};
pub use extract::{extract_or_empty, extract_text, normalize_text, DocumentFormat};
#[cfg(feature = "http-embeddings")]
pub use http_embedding::HttpEmbedding;
pub use ingest::{discover_documents, DocumentSource, IngestReport, Ingestor};
pub use persist::{load_manifest, IndexManifest, EMBEDDINGS_FILE, MANIFEST_FILE, METADATA_FILE};
pub use retriever::{Retriever, DEFAULT_TOP_K};
pub use search::{cosine_similarity, SearchHit, SearchResult, SimilaritySearch};
pub use store::{Chunk, EmbeddingIndex};
