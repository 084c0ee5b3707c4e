//! Minimal Qdrant REST client.
//!
//! Only the calls the pipeline needs: collection bootstrap with payload
//! indexes, batched upsert, delete-by-filter (durable), a one-point scroll for
//! skip checks, and vector query for the QA surface. Missing-collection
//! detection is by the remote's 404; every other non-success status is
//! surfaced.

use serde::Serialize;
use serde_json::{Map, Value, json};

use super::StoreError;

/// One `(id, vector, payload)` tuple, the unit of upsert.
#[derive(Debug, Clone, Serialize)]
pub struct PointStruct {
    /// Deterministic UUID string.
    pub id: String,
    /// Embedding vector.
    pub vector: Vec<f32>,
    /// Stored payload.
    pub payload: Map<String, Value>,
}

/// A scored search result.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub score: f32,
    pub payload: Map<String, Value>,
}

/// REST client bound to one Qdrant instance.
#[derive(Debug)]
pub struct QdrantClient {
    http: reqwest::Client,
    base_url: String,
}

impl QdrantClient {
    /// Creates a client for `base_url` (e.g. `http://qdrant:6333`).
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Returns whether the collection exists.
    ///
    /// # Errors
    ///
    /// Any status other than success or 404 is surfaced.
    pub async fn collection_exists(&self, collection: &str) -> Result<bool, StoreError> {
        let context = format!("get collection {collection}");
        let response = self
            .http
            .get(format!("{}/collections/{collection}", self.base_url))
            .send()
            .await?;

        match response.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            status => {
                let body = truncated_body(response).await;
                Err(StoreError::Status {
                    context,
                    status,
                    body,
                })
            }
        }
    }

    /// Creates the collection with cosine distance and `vector_size`.
    ///
    /// # Errors
    ///
    /// Surfaces transport and status failures.
    pub async fn create_collection(
        &self,
        collection: &str,
        vector_size: usize,
    ) -> Result<(), StoreError> {
        self.expect_success(
            self.http
                .put(format!("{}/collections/{collection}", self.base_url))
                .json(&json!({
                    "vectors": {"size": vector_size, "distance": "Cosine"},
                })),
            format!("create collection {collection}"),
        )
        .await
    }

    /// Creates a keyword payload index on `field`.
    ///
    /// # Errors
    ///
    /// Surfaces transport and status failures.
    pub async fn create_payload_index(
        &self,
        collection: &str,
        field: &str,
    ) -> Result<(), StoreError> {
        self.expect_success(
            self.http
                .put(format!(
                    "{}/collections/{collection}/index?wait=true",
                    self.base_url
                ))
                .json(&json!({
                    "field_name": field,
                    "field_schema": "keyword",
                })),
            format!("create payload index {field}"),
        )
        .await
    }

    /// Writes all `points` in a single call.
    ///
    /// # Errors
    ///
    /// Surfaces transport and status failures.
    pub async fn upsert_points(
        &self,
        collection: &str,
        points: &[PointStruct],
    ) -> Result<(), StoreError> {
        self.expect_success(
            self.http
                .put(format!(
                    "{}/collections/{collection}/points?wait=true",
                    self.base_url
                ))
                .json(&json!({"points": points})),
            format!("upsert {} points", points.len()),
        )
        .await
    }

    /// Deletes every point matching `filter`, waiting for durability.
    ///
    /// # Errors
    ///
    /// Surfaces transport and status failures.
    pub async fn delete_by_filter(
        &self,
        collection: &str,
        filter: Value,
    ) -> Result<(), StoreError> {
        self.expect_success(
            self.http
                .post(format!(
                    "{}/collections/{collection}/points/delete?wait=true",
                    self.base_url
                ))
                .json(&json!({"filter": filter})),
            "delete by filter".to_string(),
        )
        .await
    }

    /// Returns whether at least one point matches `filter`.
    ///
    /// # Errors
    ///
    /// Surfaces transport and status failures.
    pub async fn any_match(&self, collection: &str, filter: Value) -> Result<bool, StoreError> {
        let context = "scroll one point".to_string();
        let response = self
            .http
            .post(format!(
                "{}/collections/{collection}/points/scroll",
                self.base_url
            ))
            .json(&json!({
                "filter": filter,
                "limit": 1,
                "with_payload": false,
                "with_vector": false,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = truncated_body(response).await;
            return Err(StoreError::Status {
                context,
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = response.json().await?;
        Ok(value
            .pointer("/result/points")
            .and_then(Value::as_array)
            .is_some_and(|points| !points.is_empty()))
    }

    /// Nearest-neighbor query with payloads.
    ///
    /// # Errors
    ///
    /// Surfaces transport and status failures.
    pub async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, StoreError> {
        let context = "query points".to_string();
        let response = self
            .http
            .post(format!(
                "{}/collections/{collection}/points/query",
                self.base_url
            ))
            .json(&json!({
                "query": vector,
                "limit": limit,
                "with_payload": true,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = truncated_body(response).await;
            return Err(StoreError::Status {
                context,
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = response.json().await?;
        let points = value
            .pointer("/result/points")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(points
            .iter()
            .map(|point| ScoredPoint {
                score: point
                    .get("score")
                    .and_then(Value::as_f64)
                    .unwrap_or_default() as f32,
                payload: point
                    .get("payload")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn expect_success(
        &self,
        request: reqwest::RequestBuilder,
        context: String,
    ) -> Result<(), StoreError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = truncated_body(response).await;
        Err(StoreError::Status {
            context,
            status: status.as_u16(),
            body,
        })
    }
}

/// Exact-match filter on one keyword payload field.
#[must_use]
pub fn field_match(key: &str, value: &str) -> Value {
    json!({"key": key, "match": {"value": value}})
}

/// `must` conjunction of conditions.
#[must_use]
pub fn must_filter(conditions: Vec<Value>) -> Value {
    json!({"must": conditions})
}

async fn truncated_body(response: reqwest::Response) -> String {
    let mut body = response.text().await.unwrap_or_default();
    body.truncate(512);
    body
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn test_collection_exists_distinguishes_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/docs"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = QdrantClient::new(reqwest::Client::new(), server.uri());
        assert!(!client.collection_exists("docs").await.unwrap());
    }

    #[tokio::test]
    async fn test_collection_exists_surfaces_other_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/docs"))
            .respond_with(ResponseTemplate::new(500).set_body_string("broken"))
            .mount(&server)
            .await;

        let client = QdrantClient::new(reqwest::Client::new(), server.uri());
        let error = client.collection_exists("docs").await.unwrap_err();
        assert!(error.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_any_match_reads_scroll_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/docs/points/scroll"))
            .and(body_partial_json(json!({"limit": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"points": [{"id": "x"}]},
            })))
            .mount(&server)
            .await;

        let client = QdrantClient::new(reqwest::Client::new(), server.uri());
        let filter = must_filter(vec![field_match("file_id", "F1")]);
        assert!(client.any_match("docs", filter).await.unwrap());
    }

    #[tokio::test]
    async fn test_query_parses_scores_and_payloads() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/docs/points/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"points": [
                    {"id": "a", "score": 0.9, "payload": {"text": "hello"}},
                ]},
            })))
            .mount(&server)
            .await;

        let client = QdrantClient::new(reqwest::Client::new(), server.uri());
        let hits = client.query("docs", &[0.1, 0.2], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 0.9).abs() < 1e-6);
        assert_eq!(hits[0].payload["text"], "hello");
    }

    #[test]
    fn test_filter_builders() {
        let filter = must_filter(vec![field_match("file_id", "F1")]);
        assert_eq!(
            filter,
            json!({"must": [{"key": "file_id", "match": {"value": "F1"}}]})
        );
    }
}
