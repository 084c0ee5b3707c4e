//! Vector store: chunking, deterministic identities, and the Qdrant-backed
//! read/write surface.
//!
//! Writes are idempotent by construction: point ids are UUIDv5 over
//! `(doc_id, chunk_index)`, so re-ingesting the same chunk overwrites in
//! place, and the orchestrator deletes a document's prior points before each
//! upsert so stale chunks never outlive a shrinking document.

pub mod embed;
pub mod qdrant;

pub use embed::{EmbedError, Embedder, HttpEmbedder};
pub use qdrant::{PointStruct, QdrantClient, ScoredPoint};

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::config::Settings;

use qdrant::{field_match, must_filter};

/// Name component of every point id; keeps ids disjoint from other tools
/// sharing the URL namespace.
const POINT_ID_PREFIX: &str = "gdrive-assistant-bot";

/// Payload fields with keyword indexes, used by skip checks and deletes.
const INDEXED_FIELDS: [&str; 3] = ["file_id", "modified_time", "source"];

/// Errors from the vector store surface.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Embedding failed.
    #[error("embedding failed: {0}")]
    Embed(#[from] EmbedError),

    /// The store was unreachable.
    #[error("vector store request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The store rejected a call.
    #[error("vector store returned HTTP {status} for {context}: {body}")]
    Status {
        /// Which call failed.
        context: String,
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
}

/// One search result for the QA surface.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub score: f32,
    pub text: String,
    pub payload: Map<String, Value>,
}

/// Qdrant-backed document store with an attached embedder.
pub struct VectorStore {
    qdrant: QdrantClient,
    embedder: Box<dyn Embedder>,
    collection: String,
    chunk_chars: usize,
    chunk_overlap: usize,
    top_k: usize,
}

impl VectorStore {
    /// Connects to the configured store: probes the embedder for its vector
    /// dimension, then creates the collection and payload indexes if absent.
    ///
    /// # Errors
    ///
    /// Fails when the embedder or the store is unreachable; fatal at startup.
    pub async fn connect(settings: &Settings) -> Result<Self, StoreError> {
        let http = reqwest::Client::new();
        let embedder = Box::new(HttpEmbedder::new(
            http.clone(),
            settings.embed_base_url.clone(),
            settings.embed_model.clone(),
            settings.embed_api_key.clone(),
        ));
        let qdrant = QdrantClient::new(http, settings.qdrant_url.clone());
        Self::with_parts(qdrant, embedder, settings).await
    }

    /// Assembles a store from explicit parts (tests pass mocks here), running
    /// the same dimension probe and collection bootstrap as [`Self::connect`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::connect`].
    pub async fn with_parts(
        qdrant: QdrantClient,
        embedder: Box<dyn Embedder>,
        settings: &Settings,
    ) -> Result<Self, StoreError> {
        let store = Self {
            qdrant,
            embedder,
            collection: settings.qdrant_collection.clone(),
            chunk_chars: settings.chunk_chars,
            chunk_overlap: settings.chunk_overlap,
            top_k: settings.top_k,
        };

        let probe = store.embedder.embed(&["ping".to_string()]).await?;
        let dim = probe.first().map(Vec::len).unwrap_or_default();
        store.ensure_collection(dim).await?;
        Ok(store)
    }

    /// Creates the collection (cosine distance, `dim` vectors) and the keyword
    /// payload indexes iff the collection is absent.
    ///
    /// # Errors
    ///
    /// Any store failure other than the 404 existence probe.
    pub async fn ensure_collection(&self, dim: usize) -> Result<(), StoreError> {
        if self.qdrant.collection_exists(&self.collection).await? {
            return Ok(());
        }

        self.qdrant.create_collection(&self.collection, dim).await?;
        for field in INDEXED_FIELDS {
            self.qdrant
                .create_payload_index(&self.collection, field)
                .await?;
        }
        info!(
            component = "ingest",
            flow = "startup",
            collection = %self.collection,
            dim,
            "collection_created"
        );
        Ok(())
    }

    /// Collapses whitespace, then windows of `max_chars` characters with
    /// stride `max(1, max_chars - overlap)`.
    #[must_use]
    pub fn chunk_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = normalized.chars().collect();
        if chars.len() <= max_chars {
            return vec![normalized];
        }

        let step = (max_chars.saturating_sub(overlap)).max(1);
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + max_chars).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            start += step;
        }
        chunks
    }

    /// Deterministic point id for `(doc_id, chunk_index)`.
    #[must_use]
    pub fn point_id(doc_id: &str, chunk_index: usize) -> Uuid {
        Uuid::new_v5(
            &Uuid::NAMESPACE_URL,
            format!("{POINT_ID_PREFIX}:{doc_id}:{chunk_index}").as_bytes(),
        )
    }

    /// Chunks, embeds, and writes one document in a single upsert call.
    /// Returns the number of points written.
    ///
    /// Each point's payload is the caller's `payload` augmented with `text`,
    /// `source`, `ts`, and `chunk`.
    ///
    /// # Errors
    ///
    /// Surfaces embedding and store failures.
    pub async fn upsert_document(
        &self,
        doc_id: &str,
        source: &str,
        text: &str,
        payload: &Map<String, Value>,
    ) -> Result<usize, StoreError> {
        let chunks = Self::chunk_text(text, self.chunk_chars, self.chunk_overlap);
        if chunks.is_empty() {
            return Ok(0);
        }

        let vectors = self.embedder.embed(&chunks).await?;
        if vectors.len() != chunks.len() {
            return Err(EmbedError::CountMismatch {
                expected: chunks.len(),
                got: vectors.len(),
            }
            .into());
        }

        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let points: Vec<PointStruct> = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (chunk, vector))| {
                let mut point_payload = Map::new();
                point_payload.insert("text".to_string(), Value::from(chunk));
                point_payload.insert("source".to_string(), Value::from(source));
                point_payload.insert("ts".to_string(), Value::from(ts));
                point_payload.insert("chunk".to_string(), Value::from(index));
                for (key, value) in payload {
                    point_payload.insert(key.clone(), value.clone());
                }
                PointStruct {
                    id: Self::point_id(doc_id, index).to_string(),
                    vector,
                    payload: point_payload,
                }
            })
            .collect();

        self.qdrant.upsert_points(&self.collection, &points).await?;
        Ok(points.len())
    }

    /// Deletes every point whose payload `file_id` equals `file_id`, waiting
    /// for durability.
    ///
    /// # Errors
    ///
    /// Surfaces store failures.
    pub async fn delete_by_file_id(&self, file_id: &str) -> Result<(), StoreError> {
        self.qdrant
            .delete_by_filter(
                &self.collection,
                must_filter(vec![field_match("file_id", file_id)]),
            )
            .await
    }

    /// Returns whether any stored point carries this `(file_id, modified_time)`
    /// pair. Used for the skip-unchanged decision.
    ///
    /// # Errors
    ///
    /// Surfaces store failures.
    pub async fn exists_file_mtime(
        &self,
        file_id: &str,
        modified_time: &str,
    ) -> Result<bool, StoreError> {
        self.qdrant
            .any_match(
                &self.collection,
                must_filter(vec![
                    field_match("file_id", file_id),
                    field_match("modified_time", modified_time),
                ]),
            )
            .await
    }

    /// Vector search for the QA collaborator.
    ///
    /// # Errors
    ///
    /// Surfaces embedding and store failures.
    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let top_k = top_k.unwrap_or(self.top_k);
        let vectors = self.embedder.embed(&[query.to_string()]).await?;
        let Some(vector) = vectors.first() else {
            return Ok(Vec::new());
        };

        let points = self.qdrant.query(&self.collection, vector, top_k).await?;
        Ok(points
            .into_iter()
            .map(|point| SearchHit {
                score: point.score,
                text: point
                    .payload
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                payload: point.payload,
            })
            .collect())
    }

    /// Formats hits into a bounded context block for the QA prompt.
    #[must_use]
    pub fn build_context(hits: &[SearchHit], max_chars: usize) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut total = 0;

        for (index, hit) in hits.iter().enumerate() {
            let source = hit
                .payload
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let file_name = hit
                .payload
                .get("file_name")
                .and_then(Value::as_str)
                .unwrap_or("");
            let piece = format!(
                "[{}] score={:.3} source={} file={}\n{}\n",
                index + 1,
                hit.score,
                source,
                file_name,
                hit.text
            );
            if total + piece.len() > max_chars {
                break;
            }
            total += piece.len();
            parts.push(piece);
        }

        parts.join("\n")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_empty_and_whitespace_input() {
        assert!(VectorStore::chunk_text("", 100, 10).is_empty());
        assert!(VectorStore::chunk_text("   \n\t  ", 100, 10).is_empty());
    }

    #[test]
    fn test_chunk_short_input_is_single_chunk() {
        let chunks = VectorStore::chunk_text("hello  world", 100, 10);
        assert_eq!(chunks, vec!["hello world"]);
    }

    #[test]
    fn test_chunk_window_and_stride() {
        // 26 chars, window 10, overlap 4 -> stride 6.
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = VectorStore::chunk_text(text, 10, 4);
        assert_eq!(
            chunks,
            vec!["abcdefghij", "ghijklmnop", "mnopqrstuv", "stuvwxyz"]
        );
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[test]
    fn test_chunk_coverage_reconstructs_input() {
        let text = "The quick brown fox jumps over the lazy dog and keeps running far away";
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let max_chars = 20;
        let overlap = 5;
        let chunks = VectorStore::chunk_text(text, max_chars, overlap);

        // Concatenating each chunk's fresh (non-overlapping) suffix rebuilds
        // the normalized input.
        let step = max_chars - overlap;
        let mut rebuilt: String = chunks[0].clone();
        for chunk in &chunks[1..] {
            let chars: Vec<char> = chunk.chars().collect();
            let fresh_start = max_chars - step;
            rebuilt.push_str(&chars[fresh_start.min(chars.len())..].iter().collect::<String>());
        }
        assert_eq!(rebuilt, normalized);
    }

    #[test]
    fn test_chunk_handles_multibyte_text() {
        let text = "привет мир это тест юникода в чанках";
        let chunks = VectorStore::chunk_text(text, 10, 2);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[test]
    fn test_zero_stride_guard() {
        // overlap >= max_chars would stall the window; stride clamps to 1.
        let chunks = VectorStore::chunk_text("abcdef", 2, 5);
        assert_eq!(chunks.len(), 6);
        assert_eq!(chunks.first().map(String::as_str), Some("ab"));
        assert_eq!(chunks.last().map(String::as_str), Some("f"));
    }

    #[test]
    fn test_point_id_is_deterministic_and_distinct() {
        let a1 = VectorStore::point_id("doc-a", 0);
        let a2 = VectorStore::point_id("doc-a", 0);
        let b = VectorStore::point_id("doc-a", 1);
        let c = VectorStore::point_id("doc-b", 0);

        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_ne!(a1, c);
        assert_ne!(b, c);
    }

    #[test]
    fn test_point_id_matches_known_namespace_derivation() {
        let expected = Uuid::new_v5(
            &Uuid::NAMESPACE_URL,
            b"gdrive-assistant-bot:F1:0",
        );
        assert_eq!(VectorStore::point_id("F1", 0), expected);
    }

    #[test]
    fn test_build_context_caps_at_max_chars() {
        let hit = |text: &str| SearchHit {
            score: 0.5,
            text: text.to_string(),
            payload: Map::new(),
        };
        let hits = vec![hit(&"a".repeat(50)), hit(&"b".repeat(50)), hit(&"c".repeat(50))];

        let context = VectorStore::build_context(&hits, 160);
        assert!(context.contains(&"a".repeat(50)));
        assert!(context.contains(&"b".repeat(50)));
        assert!(!context.contains(&"c".repeat(50)));
        assert!(context.starts_with("[1] score=0.500"));
    }
}
