//! `groundwork.toml` loading.
//!
//! Every section is optional; a missing key takes the library default. The
//! embedding API key may also come from the environment (or a `.env` file)
//! so it never has to be written into the config file.

use std::path::{Path, PathBuf};

use groundwork_core::{GroundworkError, GroundworkResult};
use groundwork_retrieval::{ChunkingConfig, EmbeddingConfig, IngestConfig, RetrievalConfig};
use serde::Deserialize;
use tracing::info;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "groundwork.toml";

/// Environment variable that overrides `embedding.api_key`.
pub const API_KEY_ENV: &str = "GROUNDWORK_EMBEDDING_API_KEY";

/// Top-level CLI configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GroundworkConfig {
    /// Directory holding the persisted index.
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,
    /// `[embedding]` section.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// `[chunking]` section.
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// `[ingest]` section.
    #[serde(default)]
    pub ingest: IngestConfig,
    /// `[retrieval]` section.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

impl Default for GroundworkConfig {
    fn default() -> Self {
        Self {
            index_dir: default_index_dir(),
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            ingest: IngestConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("embeddings_output")
}

impl GroundworkConfig {
    /// Parse and validate TOML text.
    pub fn parse(text: &str) -> GroundworkResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| GroundworkError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config file at `path`, or the defaults.
    ///
    /// With `explicit` unset a missing file means built-in defaults; a file
    /// the user named on the command line must exist.
    pub async fn load(path: &Path, explicit: bool) -> GroundworkResult<Self> {
        if !explicit && !tokio::fs::try_exists(path).await? {
            info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            GroundworkError::Config(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        let config = Self::parse(&text)?;
        info!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Replace the embedding API key when `key` is set and non-empty.
    pub fn with_api_key_override(mut self, key: Option<String>) -> Self {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.embedding.api_key = Some(key);
        }
        self
    }

    fn validate(&self) -> GroundworkResult<()> {
        if self.chunking.max_chars == 0 {
            return Err(GroundworkError::Config(
                "chunking.max_chars must be at least 1".to_string(),
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(GroundworkError::Config(
                "embedding.dimension must be at least 1".to_string(),
            ));
        }
        if self.ingest.concurrency == 0 {
            return Err(GroundworkError::Config(
                "ingest.concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
