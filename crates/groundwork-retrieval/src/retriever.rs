use std::sync::Arc;
use std::time::Duration;

use groundwork_core::{GroundworkError, GroundworkResult};
use parking_lot::RwLock;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::search::{SearchResult, SimilaritySearch};
use crate::store::EmbeddingIndex;

/// Number of chunks returned when the caller does not pick one.
pub const DEFAULT_TOP_K: usize = 3;

/// Query-time entry point: embed a question and return the most relevant
/// stored text.
///
/// The served index is an immutable snapshot behind an `Arc`. Each query
/// clones the `Arc` once and searches without holding the lock, so
/// [`replace_index`](Self::replace_index) never waits for in-flight queries
/// and they never observe a half-built index.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: RwLock<Arc<EmbeddingIndex>>,
    top_k: usize,
    embed_timeout: Option<Duration>,
}

impl Retriever {
    /// Serve `index` using `embedder` for queries.
    ///
    /// The embedder's dimension must match the index's, unless the index is
    /// empty.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: EmbeddingIndex,
    ) -> GroundworkResult<Self> {
        check_dimension(embedder.as_ref(), &index)?;
        Ok(Self {
            embedder,
            index: RwLock::new(Arc::new(index)),
            top_k: DEFAULT_TOP_K,
            embed_timeout: None,
        })
    }

    /// Apply query-time settings.
    pub fn with_config(mut self, config: &RetrievalConfig) -> Self {
        self.top_k = config.top_k;
        self.embed_timeout = config.embed_timeout_secs.map(Duration::from_secs);
        self
    }

    /// Set the default number of chunks used by [`context`](Self::context).
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Bound every query embedding call by `timeout`.
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = Some(timeout);
        self
    }

    /// The default K.
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// The index currently being served.
    pub fn snapshot(&self) -> Arc<EmbeddingIndex> {
        Arc::clone(&self.index.read())
    }

    /// Atomically start serving `index`. Queries already running finish
    /// against the snapshot they started with.
    pub fn replace_index(&self, index: EmbeddingIndex) -> GroundworkResult<()> {
        check_dimension(self.embedder.as_ref(), &index)?;
        let rows = index.len();
        *self.index.write() = Arc::new(index);
        debug!(rows, "Retriever index replaced");
        Ok(())
    }

    /// Ranked results for `query`, at most `k` of them.
    ///
    /// A blank query or an empty index yields no results without calling the
    /// embedder.
    pub async fn retrieve(&self, query: &str, k: usize) -> GroundworkResult<Vec<SearchResult>> {
        let snapshot = self.snapshot();
        if query.trim().is_empty() || snapshot.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embed_query(query).await?;
        let hits = snapshot.search(&vector, k)?;
        debug!(
            k,
            returned = hits.len(),
            best = hits.first().map(|h| h.similarity),
            "Query answered"
        );
        Ok(hits.into_iter().map(SearchResult::from).collect())
    }

    /// The texts of the `k` most relevant chunks, best first, joined by `"\n"`.
    ///
    /// Returns an empty string when nothing is stored.
    pub async fn get_relevant_context(&self, query: &str, k: usize) -> GroundworkResult<String> {
        let results = self.retrieve(query, k).await?;
        Ok(results
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// [`get_relevant_context`](Self::get_relevant_context) with the default K.
    pub async fn context(&self, query: &str) -> GroundworkResult<String> {
        self.get_relevant_context(query, self.top_k).await
    }

    async fn embed_query(&self, query: &str) -> GroundworkResult<Vec<f32>> {
        match self.embed_timeout {
            Some(limit) => tokio::time::timeout(limit, self.embedder.embed(query))
                .await
                .map_err(|_| {
                    GroundworkError::Embedding(format!(
                        "query embedding timed out after {}ms",
                        limit.as_millis()
                    ))
                })?,
            None => self.embedder.embed(query).await,
        }
    }
}

fn check_dimension(
    embedder: &dyn EmbeddingProvider,
    index: &EmbeddingIndex,
) -> GroundworkResult<()> {
    match index.dimension() {
        Some(expected) if expected != embedder.dimension() => {
            Err(GroundworkError::DimensionMismatch {
                expected,
                actual: embedder.dimension(),
            })
        }
        _ => Ok(()),
    }
}
