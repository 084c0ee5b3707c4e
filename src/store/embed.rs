//! Text embedding behind a narrow trait.
//!
//! The embedder is an external collaborator: a batch-friendly service mapping
//! strings to fixed-dimension vectors. The HTTP implementation speaks the
//! OpenAI-compatible `/embeddings` contract; tests substitute their own
//! [`Embedder`].

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Errors from the embedding service.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The service was unreachable.
    #[error("embedding request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The service rejected the request.
    #[error("embedder returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The service returned a different number of vectors than inputs.
    #[error("embedder returned {got} vectors for {expected} inputs")]
    CountMismatch {
        /// Number of input strings.
        expected: usize,
        /// Number of returned vectors.
        got: usize,
    },
}

/// Maps a batch of strings to fixed-dimension vectors, preserving order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds `texts`, one vector per input, in input order.
    ///
    /// # Errors
    ///
    /// Surfaces transport and contract failures.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// OpenAI-compatible HTTP embedder.
#[derive(Debug)]
pub struct HttpEmbedder {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    /// Creates an embedder for `{base_url}/embeddings`.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut request = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
            }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(512);
            return Err(EmbedError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut parsed: EmbeddingsResponse = response.json().await?;
        if parsed.data.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                expected: texts.len(),
                got: parsed.data.len(),
            });
        }

        // The contract numbers entries; honor it rather than assuming order.
        parsed.data.sort_by_key(|entry| entry.index);
        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn test_embed_returns_vectors_in_index_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(serde_json::json!({"model": "test-model"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [2.0, 2.0]},
                    {"index": 0, "embedding": [1.0, 1.0]},
                ],
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(
            reqwest::Client::new(),
            format!("{}/v1", server.uri()),
            "test-model",
            None,
        );
        let vectors = embedder
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 1.0], vec![2.0, 2.0]]);
    }

    #[tokio::test]
    async fn test_count_mismatch_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [1.0]}],
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(
            reqwest::Client::new(),
            format!("{}/v1", server.uri()),
            "test-model",
            None,
        );
        let error = embedder
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            EmbedError::CountMismatch { expected: 2, got: 1 }
        ));
    }

    #[tokio::test]
    async fn test_error_status_surfaces_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(503).set_body_string("warming up"))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(
            reqwest::Client::new(),
            format!("{}/v1", server.uri()),
            "test-model",
            None,
        );
        let error = embedder.embed(&["a".to_string()]).await.unwrap_err();
        assert!(error.to_string().contains("503"));
        assert!(error.to_string().contains("warming up"));
    }
}
