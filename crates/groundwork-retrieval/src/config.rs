use serde::{Deserialize, Serialize};

use crate::chunker::DEFAULT_MAX_CHARS;
use crate::retriever::DEFAULT_TOP_K;

/// Which embedding backend to construct.
/// Which embedding provider to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// In-process hashed bag-of-words embedding ([`crate::LocalEmbedding`]).
    #[default]
    Local,
    /// OpenAI-compatible `/v1/embeddings` endpoint. Requires the
    /// `http-embeddings` feature.
    Http,
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider backend, `local` by default.
    #[serde(default)]
    pub provider: EmbeddingBackend,
    /// Vector width produced by the provider. Every chunk in one index shares it.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Remote model identifier (ignored by the local backend).
    #[serde(default = "default_model")]
    pub model: String,
    /// Remote API root; see [`EmbeddingConfig::base_url`] for the fallback.
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Bearer token for the remote API.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Maximum number of texts sent in a single remote request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Per-request timeout for remote calls, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::Local,
            dimension: default_dimension(),
            model: default_model(),
            api_base_url: None,
            api_key: None,
            batch_size: default_batch_size(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    /// Base URL of the remote embedding API.
    pub fn base_url(&self) -> &str {
        self.api_base_url
            .as_deref()
            .unwrap_or("https://api.openai.com")
    }
}

/// Chunker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Soft upper bound on chunk length, in characters.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

/// Batch ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// File extensions (without the dot, case-insensitive) treated as documents.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Number of documents processed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Company directories to walk. Empty means every directory under the root.
    #[serde(default)]
    pub companies: Vec<String>,
    /// Category directories to walk. Empty means every directory under a company.
    #[serde(default)]
    pub categories: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            concurrency: default_concurrency(),
            companies: Vec::new(),
            categories: Vec::new(),
        }
    }
}

impl IngestConfig {
    /// Whether a file with this extension should be ingested.
    pub fn accepts_extension(&self, ext: &str) -> bool {
        self.extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    /// Whether the named company directory should be walked.
    pub fn accepts_company(&self, name: &str) -> bool {
        self.companies.is_empty() || self.companies.iter().any(|c| c == name)
    }

    /// Whether the named category directory should be walked.
    pub fn accepts_category(&self, name: &str) -> bool {
        self.categories.is_empty() || self.categories.iter().any(|c| c == name)
    }
}

/// Query-time settings for the [`crate::Retriever`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Chunks returned when the caller does not pick K.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Upper bound on a single query embedding call. `None` waits indefinitely.
    #[serde(default)]
    pub embed_timeout_secs: Option<u64>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            embed_timeout_secs: None,
        }
    }
}

fn default_dimension() -> usize {
    300
}
fn default_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_max_chars() -> usize {
    DEFAULT_MAX_CHARS
}
fn default_extensions() -> Vec<String> {
    vec!["pdf".to_string(), "txt".to_string(), "md".to_string()]
}
fn default_concurrency() -> usize {
    4
}
fn default_top_k() -> usize {
    DEFAULT_TOP_K
}
