//! Core error definitions for the Groundwork retrieval engine.
//!
//! Every Groundwork crate reports failures through a single error enum so
//! callers can tell per-document ingestion problems (skip and continue) apart
//! from store-level failures (surface and stop).
//!
//! # Main types
//!
//! - [`GroundworkError`]: Unified error enum for all Groundwork subsystems.
//! - [`GroundworkResult`]: Convenience alias for `Result<T, GroundworkError>`.

/// Top-level error type for the Groundwork retrieval engine.
///
/// Ingestion treats [`Extraction`](GroundworkError::Extraction),
/// [`DimensionMismatch`](GroundworkError::DimensionMismatch) and
/// [`InvalidChunk`](GroundworkError::InvalidChunk) as local to one document or
/// chunk. [`Io`](GroundworkError::Io) and
/// [`CorruptStore`](GroundworkError::CorruptStore) are fatal to the store
/// operation that raised them.
#[derive(Debug, thiserror::Error)]
pub enum GroundworkError {
    /// A source document could not be read or converted to text.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// A vector's length differs from the dimension established by the index.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the index (or provider) requires.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },

    /// A chunk is missing required content (empty text or embedding).
    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    /// Persisted index artifacts failed validation on load.
    #[error("Corrupt store: {0}")]
    CorruptStore(String),

    /// The embedding provider failed or timed out.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// An error from an outbound HTTP request (e.g. a remote embedding API).
    #[error("HTTP error: {0}")]
    Http(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GroundworkError {
    /// Whether the error only affects a single document or chunk during
    /// ingestion, so the batch may continue.
    pub fn is_per_document(&self) -> bool {
        matches!(
            self,
            GroundworkError::Extraction(_)
                | GroundworkError::DimensionMismatch { .. }
                | GroundworkError::InvalidChunk(_)
                | GroundworkError::Embedding(_)
                | GroundworkError::Http(_)
        )
    }
}

/// A convenience `Result` alias using [`GroundworkError`].
pub type GroundworkResult<T> = Result<T, GroundworkError>;
