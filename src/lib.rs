//! Drive-to-vector-index ingestion core.
//!
//! This library continuously mirrors a Google Drive corpus into a Qdrant
//! collection so a conversational assistant can answer questions grounded in
//! it: discover candidate files, decode them with format-specific extractors,
//! chunk and embed the text, and upsert with deterministic identities, all
//! under a shared token-bucket rate limit, bounded worker parallelism, and a
//! cooperative shutdown signal.
//!
//! # Architecture
//!
//! - [`config`] - Environment-driven settings with range validation
//! - [`shutdown`] - One-shot process-wide shutdown signal + signal wiring
//! - [`limiter`] - Token-bucket permit gate for remote API calls
//! - [`backoff`] - Retry wrapper with jittered exponential backoff
//! - [`drive`] - Google Drive / Docs / Sheets / Slides REST clients and auth
//! - [`provider`] - Storage contracts and the Google Drive provider
//! - [`extract`] - Extractor registry and the per-format decoder family
//! - [`store`] - Chunking, deterministic point ids, Qdrant client, embedder
//! - [`ingest`] - Orchestrator: worker pool, progress accounting, loop mode
//! - [`health`] / [`logging`] / [`smoke`] - Operational surface

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backoff;
pub mod config;
pub mod drive;
pub mod extract;
pub mod health;
pub mod ingest;
pub mod limiter;
pub mod logging;
pub mod provider;
pub mod shutdown;
pub mod smoke;
pub mod store;

// Re-export commonly used types
pub use backoff::{BackoffPolicy, execute_with_backoff};
pub use config::{IngestMode, Settings, StorageBackend};
pub use ingest::{IngestService, IngestStatus, IngestStore, RunStats};
pub use limiter::RateLimiter;
pub use provider::{FileDescriptor, FileTypeFilter, StorageProvider, build_provider};
pub use shutdown::{ShutdownRequested, ShutdownSignal};
pub use store::{SearchHit, VectorStore};
