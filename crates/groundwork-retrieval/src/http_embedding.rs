use std::time::Duration;

use async_trait::async_trait;
use groundwork_core::{GroundworkError, GroundworkResult};
use serde::Deserialize;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::embedding::EmbeddingProvider;

/// OpenAI-compatible embeddings backend.
///
/// Works with OpenAI, Ollama, vLLM, and any other server that implements
/// `POST /v1/embeddings`. Batches are split into requests of at most
/// `batch_size` inputs.
pub struct HttpEmbedding {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
    batch_size: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbedding {
    /// Build a client from configuration.
    pub fn new(config: &EmbeddingConfig) -> GroundworkResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| GroundworkError::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url().trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
        })
    }

    async fn request(&self, inputs: &[&str]) -> GroundworkResult<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });

        let mut request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let resp = request
            .json(&body)
            .send()
            .await
            .map_err(|e| GroundworkError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GroundworkError::Http(format!(
                "embedding API returned {status}: {text}"
            )));
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| GroundworkError::Embedding(format!("invalid embedding response: {e}")))?;

        if parsed.data.len() != inputs.len() {
            return Err(GroundworkError::Embedding(format!(
                "embedding API returned {} vectors for {} inputs",
                parsed.data.len(),
                inputs.len()
            )));
        }

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);

        let mut vectors = Vec::with_capacity(data.len());
        for datum in data {
            if datum.embedding.len() != self.dimension {
                return Err(GroundworkError::DimensionMismatch {
                    expected: self.dimension,
                    actual: datum.embedding.len(),
                });
            }
            vectors.push(datum.embedding);
        }
        debug!(count = vectors.len(), model = %self.model, "Remote embeddings received");
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedding {
    async fn embed(&self, text: &str) -> GroundworkResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(GroundworkError::Embedding(
                "cannot embed empty text".to_string(),
            ));
        }
        let mut vectors = self.request(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| GroundworkError::Embedding("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> GroundworkResult<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(GroundworkError::Embedding(
                "cannot embed empty text".to_string(),
            ));
        }
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            results.extend(self.request(batch).await?);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::EmbeddingBackend;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer, dimension: usize, batch_size: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: EmbeddingBackend::Http,
            dimension,
            model: "test-embed".to_string(),
            api_base_url: Some(server.uri()),
            api_key: Some("sk-test".to_string()),
            batch_size,
            request_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_embed_single() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({"model": "test-embed"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [0.1, 0.2, 0.3]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = HttpEmbedding::new(&config_for(&server, 3, 8)).unwrap();
        let vec = provider.embed("grace period").await.unwrap();
        assert_eq!(vec, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_batch_reordered_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ]
            })))
            .mount(&server)
            .await;

        let provider = HttpEmbedding::new(&config_for(&server, 2, 8)).unwrap();
        let vecs = provider.embed_batch(&["first", "second"]).await.unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_batch_split_into_requests() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 0, "embedding": [1.0, 0.0]},
                    {"index": 1, "embedding": [0.0, 1.0]}
                ]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let provider = HttpEmbedding::new(&config_for(&server, 2, 2)).unwrap();
        let vecs = provider
            .embed_batch(&["a1", "b2", "c3", "d4"])
            .await
            .unwrap();
        assert_eq!(vecs.len(), 4);
    }

    #[tokio::test]
    async fn test_wrong_dimension_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [0.1, 0.2]}]
            })))
            .mount(&server)
            .await;

        let provider = HttpEmbedding::new(&config_for(&server, 3, 8)).unwrap();
        let err = provider.embed("text").await.unwrap_err();
        assert!(matches!(
            err,
            GroundworkError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_server_error_is_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider = HttpEmbedding::new(&config_for(&server, 3, 8)).unwrap();
        let err = provider.embed("text").await.unwrap_err();
        match err {
            GroundworkError::Http(msg) => assert!(msg.contains("503"), "{msg}"),
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_embedding_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let provider = HttpEmbedding::new(&config_for(&server, 3, 8)).unwrap();
        assert!(matches!(
            provider.embed("text").await,
            Err(GroundworkError::Embedding(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_text_not_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let provider = HttpEmbedding::new(&config_for(&server, 3, 8)).unwrap();
        assert!(provider.embed("  ").await.is_err());
        assert!(provider.embed_batch(&["ok", ""]).await.is_err());
    }
}
