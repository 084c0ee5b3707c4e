//! Ingest orchestration.
//!
//! [`IngestService`] runs the per-file pipeline (skip-unchanged check →
//! extractor lookup → extract → delete-before-upsert) across a bounded worker
//! pool. Work is submitted from a single iterator over the listing, one task
//! per file; each completion triggers at most one new submission, keeping
//! in-flight work at or below the pool size. Per-file failures are counted and
//! never abort the run; listing failures do. When the shutdown signal is set,
//! submission stops and all in-flight tasks are drained so every started file
//! lands in a status bucket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::config::Settings;
use crate::drive::DriveError;
use crate::extract::{ExtractError, ExtractorRegistry};
use crate::limiter::RateLimiter;
use crate::provider::{FileDescriptor, StorageProvider};
use crate::shutdown::ShutdownSignal;
use crate::store::{StoreError, VectorStore};

/// How long the scheduler waits on completions before considering a
/// time-based progress log.
const COMPLETION_WAIT: Duration = Duration::from_secs(1);

/// Outcome of one file's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    /// Extracted and written to the store.
    Ok,
    /// The pipeline failed; logged, run continues.
    Failed,
    /// The store already holds this `(file_id, modified_time)`.
    SkippedUnchanged,
    /// Extraction produced only whitespace.
    SkippedEmpty,
    /// No registered extractor handles the file.
    SkippedUnsupported,
    /// Shutdown was requested before or during the pipeline.
    SkippedStopped,
}

impl IngestStatus {
    /// Status name as logged.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::SkippedUnchanged => "skipped_unchanged",
            Self::SkippedEmpty => "skipped_empty",
            Self::SkippedUnsupported => "skipped_unsupported",
            Self::SkippedStopped => "skipped_stopped",
        }
    }
}

/// Store contract required by ingest.
#[async_trait]
pub trait IngestStore: Send + Sync {
    /// Returns whether this `(file_id, modified_time)` is already stored.
    async fn exists_file_mtime(
        &self,
        file_id: &str,
        modified_time: &str,
    ) -> Result<bool, StoreError>;

    /// Removes every stored point for `file_id`.
    async fn delete_by_file_id(&self, file_id: &str) -> Result<(), StoreError>;

    /// Writes one document; returns the number of points written.
    async fn upsert_document(
        &self,
        doc_id: &str,
        source: &str,
        text: &str,
        payload: &Map<String, Value>,
    ) -> Result<usize, StoreError>;
}

#[async_trait]
impl IngestStore for VectorStore {
    async fn exists_file_mtime(
        &self,
        file_id: &str,
        modified_time: &str,
    ) -> Result<bool, StoreError> {
        VectorStore::exists_file_mtime(self, file_id, modified_time).await
    }

    async fn delete_by_file_id(&self, file_id: &str) -> Result<(), StoreError> {
        VectorStore::delete_by_file_id(self, file_id).await
    }

    async fn upsert_document(
        &self,
        doc_id: &str,
        source: &str,
        text: &str,
        payload: &Map<String, Value>,
    ) -> Result<usize, StoreError> {
        VectorStore::upsert_document(self, doc_id, source, text, payload).await
    }
}

/// Counters for one ingest run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub total: usize,
    pub completed: usize,
    pub ok: usize,
    pub failed: usize,
    pub skipped_unchanged: usize,
    pub skipped_empty: usize,
    pub skipped_unsupported: usize,
    pub skipped_stopped: usize,
    pub workers: usize,
    pub elapsed_ms: u64,
}

impl RunStats {
    fn record(&mut self, status: IngestStatus) {
        match status {
            IngestStatus::Ok => self.ok += 1,
            IngestStatus::Failed => self.failed += 1,
            IngestStatus::SkippedUnchanged => self.skipped_unchanged += 1,
            IngestStatus::SkippedEmpty => self.skipped_empty += 1,
            IngestStatus::SkippedUnsupported => self.skipped_unsupported += 1,
            IngestStatus::SkippedStopped => self.skipped_stopped += 1,
        }
        self.completed += 1;
    }
}

/// Run-aborting failures. Per-file failures never surface here.
#[derive(Debug, Error)]
pub enum RunError {
    /// The provider could not produce the listing.
    #[error("listing failed: {0}")]
    Listing(#[from] DriveError),
}

#[derive(Debug, Error)]
enum FileError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FileError {
    fn is_shutdown(&self) -> bool {
        matches!(self, Self::Extract(err) if err.is_shutdown())
    }
}

/// The ingest pipeline: lists files, extracts content, writes to the store.
#[derive(Clone)]
pub struct IngestService {
    store: Arc<dyn IngestStore>,
    provider: Arc<dyn StorageProvider>,
    registry: &'static ExtractorRegistry,
    settings: Arc<Settings>,
}

impl IngestService {
    /// Wires the pipeline together.
    #[must_use]
    pub fn new(
        store: Arc<dyn IngestStore>,
        provider: Arc<dyn StorageProvider>,
        registry: &'static ExtractorRegistry,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            provider,
            registry,
            settings,
        }
    }

    /// One full pass over the corpus.
    ///
    /// # Errors
    ///
    /// Only listing failures abort the run and surface here.
    pub async fn run_once(
        &self,
        limiter: &Arc<RateLimiter>,
        stop: &ShutdownSignal,
    ) -> Result<RunStats, RunError> {
        let filter = self.registry.file_type_filter();
        let files = match self.provider.list_files(&filter, limiter, stop).await {
            Ok(files) => files,
            // Shutdown during a listing wait is cooperative, not a failure.
            Err(err) if err.is_shutdown() => return Ok(RunStats::default()),
            Err(err) => {
                error!(
                    component = "ingest",
                    flow = "ingest_scope",
                    provider = self.provider.name(),
                    error = %err,
                    "ingest_scope_failed"
                );
                return Err(err.into());
            }
        };

        let total = files.len();
        if total == 0 {
            info!(
                component = "ingest",
                flow = "ingest",
                total = 0,
                mode = self.settings.ingest_mode.as_str(),
                "nothing_to_ingest"
            );
            return Ok(RunStats::default());
        }

        let workers = self.settings.workers.min(total);
        info!(
            component = "ingest",
            flow = "ingest",
            workers,
            total,
            configured_workers = self.settings.workers,
            "parallelism"
        );

        let mut stats = RunStats {
            total,
            workers,
            ..RunStats::default()
        };
        let started = Instant::now();
        let mut last_progress = Instant::now();

        let mut pending = files.into_iter();
        let mut in_flight: JoinSet<(FileDescriptor, Result<IngestStatus, FileError>)> =
            JoinSet::new();

        for _ in 0..workers {
            if !self.submit_one(&mut pending, &mut in_flight, limiter, stop) {
                break;
            }
        }

        while !in_flight.is_empty() {
            let Ok(joined) = tokio::time::timeout(COMPLETION_WAIT, in_flight.join_next()).await
            else {
                self.progress(false, &mut last_progress, started, &stats, in_flight.len());
                continue;
            };
            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok((file, result)) => {
                    let status = match result {
                        Ok(status) => status,
                        Err(err) if err.is_shutdown() => {
                            stop.set();
                            IngestStatus::SkippedStopped
                        }
                        Err(err) => {
                            error!(
                                component = "ingest",
                                flow = "ingest_file",
                                file_id = %file.id,
                                file_name = file.display_name(),
                                mime_type = file.mime_type.as_deref().unwrap_or(""),
                                modified_time = file.modified_time.as_deref().unwrap_or(""),
                                error = %err,
                                "ingest_failed"
                            );
                            IngestStatus::Failed
                        }
                    };
                    stats.record(status);
                }
                Err(join_err) => {
                    // A panicking worker is a failed file, not a failed run.
                    error!(
                        component = "ingest",
                        flow = "ingest_file",
                        error = %join_err,
                        "ingest_failed"
                    );
                    stats.record(IngestStatus::Failed);
                }
            }

            self.progress(false, &mut last_progress, started, &stats, in_flight.len());
            self.submit_one(&mut pending, &mut in_flight, limiter, stop);
        }

        self.progress(true, &mut last_progress, started, &stats, 0);

        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            component = "ingest",
            flow = "ingest",
            completed = stats.completed,
            total = stats.total,
            ok = stats.ok,
            fail = stats.failed,
            skipped_unchanged = stats.skipped_unchanged,
            skipped_empty = stats.skipped_empty,
            skipped_unsupported = stats.skipped_unsupported,
            skipped_stopped = stats.skipped_stopped,
            workers = stats.workers,
            elapsed_ms = stats.elapsed_ms,
            stopped = stop.is_set(),
            mode = self.settings.ingest_mode.as_str(),
            "ingest_done"
        );

        Ok(stats)
    }

    /// Runs forever: one pass, then an interruptible poll sleep, until the
    /// shutdown signal is set.
    ///
    /// # Errors
    ///
    /// Propagates listing failures from any pass.
    pub async fn run_loop(
        &self,
        limiter: &Arc<RateLimiter>,
        stop: &ShutdownSignal,
    ) -> Result<(), RunError> {
        while !stop.is_set() {
            self.run_once(limiter, stop).await?;

            debug!(
                component = "ingest",
                flow = "ingest",
                poll_seconds = self.settings.poll_seconds,
                "polling"
            );
            stop.wait_for(Duration::from_secs(self.settings.poll_seconds))
                .await;
        }
        Ok(())
    }

    /// Submits the next pending file, unless the listing is exhausted or
    /// shutdown was requested. Returns whether a task was submitted.
    fn submit_one(
        &self,
        pending: &mut std::vec::IntoIter<FileDescriptor>,
        in_flight: &mut JoinSet<(FileDescriptor, Result<IngestStatus, FileError>)>,
        limiter: &Arc<RateLimiter>,
        stop: &ShutdownSignal,
    ) -> bool {
        if stop.is_set() {
            return false;
        }
        let Some(file) = pending.next() else {
            return false;
        };

        let service = self.clone();
        let limiter = Arc::clone(limiter);
        let stop = stop.clone();
        in_flight.spawn(async move {
            let result = service.ingest_one(&file, limiter, stop).await;
            (file, result)
        });
        true
    }

    /// The per-file pipeline.
    async fn ingest_one(
        &self,
        file: &FileDescriptor,
        limiter: Arc<RateLimiter>,
        stop: ShutdownSignal,
    ) -> Result<IngestStatus, FileError> {
        if stop.is_set() {
            return Ok(IngestStatus::SkippedStopped);
        }

        let mtime = file.modified_time.clone().unwrap_or_default();
        // A missing version token means always-changed.
        if !mtime.is_empty() && self.store.exists_file_mtime(&file.id, &mtime).await? {
            return Ok(IngestStatus::SkippedUnchanged);
        }

        let Some(extractor) = self.registry.find(file) else {
            debug!(
                component = "ingest",
                flow = "ingest_file",
                file_id = %file.id,
                file_name = file.display_name(),
                mime_type = file.mime_type.as_deref().unwrap_or(""),
                "unsupported_file_type"
            );
            return Ok(IngestStatus::SkippedUnsupported);
        };

        let context = self.provider.build_extraction_context(limiter, stop.clone());
        let content = match extractor.extract(file, &context).await {
            Ok(content) => content,
            Err(err) if err.is_shutdown() => return Err(err.into()),
            Err(err) => {
                error!(
                    component = "ingest",
                    flow = "ingest_file",
                    file_id = %file.id,
                    file_name = file.display_name(),
                    mime_type = file.mime_type.as_deref().unwrap_or(""),
                    error = %err,
                    "extraction_failed"
                );
                return Ok(IngestStatus::Failed);
            }
        };

        if stop.is_set() {
            return Ok(IngestStatus::SkippedStopped);
        }
        if content.text.trim().is_empty() {
            return Ok(IngestStatus::SkippedEmpty);
        }

        let mut payload = Map::new();
        payload.insert("file_id".to_string(), Value::from(file.id.clone()));
        payload.insert("file_name".to_string(), Value::from(file.display_name()));
        payload.insert("file_type".to_string(), Value::from(content.file_type.clone()));
        payload.insert("modified_time".to_string(), Value::from(mtime.clone()));
        for (key, value) in &content.metadata {
            payload.insert(key.clone(), value.clone());
        }

        self.store.delete_by_file_id(&file.id).await?;
        let chunks = self
            .store
            .upsert_document(&file.id, self.provider.name(), &content.text, &payload)
            .await?;

        info!(
            component = "ingest",
            flow = "ingest_file",
            file_id = %file.id,
            file_name = file.display_name(),
            chunks,
            file_type = %content.file_type,
            modified_time = %mtime,
            "indexed"
        );
        Ok(IngestStatus::Ok)
    }

    /// Logs progress on the dual trigger: every N completions or every M
    /// seconds, whichever fires first; `force` bypasses both.
    fn progress(
        &self,
        force: bool,
        last_progress: &mut Instant,
        started: Instant,
        stats: &RunStats,
        in_flight: usize,
    ) {
        let files_trigger = stats.completed as u64 % self.settings.progress_files == 0;
        let time_trigger =
            last_progress.elapsed() >= Duration::from_secs(self.settings.progress_seconds);
        if !force && !files_trigger && !time_trigger {
            return;
        }

        *last_progress = Instant::now();
        info!(
            component = "ingest",
            flow = "ingest",
            completed = stats.completed,
            total = stats.total,
            ok = stats.ok,
            fail = stats.failed,
            skipped_unchanged = stats.skipped_unchanged,
            skipped_empty = stats.skipped_empty,
            skipped_unsupported = stats.skipped_unsupported,
            skipped_stopped = stats.skipped_stopped,
            workers = stats.workers,
            elapsed_ms = started.elapsed().as_millis() as u64,
            in_flight,
            "progress"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::drive::{DriveClient, TokenSource};
    use crate::extract::{ExtractError, ExtractedContent, ExtractionContext, Extractor};

    fn test_settings() -> Arc<Settings> {
        Arc::new(
            Settings::from_lookup(|name| match name {
                "STORAGE_GOOGLE_DRIVE_ALL_ACCESSIBLE" => Some("true".to_string()),
                "INGEST_WORKERS" => Some("4".to_string()),
                _ => None,
            })
            .unwrap(),
        )
    }

    fn descriptor(id: &str, name: &str, mime: &str, mtime: Option<&str>) -> FileDescriptor {
        FileDescriptor {
            id: id.to_string(),
            name: Some(name.to_string()),
            mime_type: Some(mime.to_string()),
            modified_time: mtime.map(String::from),
            size_bytes: Some(12),
            extension: name.rsplit_once('.').map(|(_, ext)| ext.to_string()),
            raw: Map::new(),
        }
    }

    /// Store double that records call order and returns canned answers.
    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<String>>,
        exists: bool,
    }

    impl RecordingStore {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl IngestStore for RecordingStore {
        async fn exists_file_mtime(
            &self,
            file_id: &str,
            modified_time: &str,
        ) -> Result<bool, StoreError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("exists:{file_id}:{modified_time}"));
            Ok(self.exists)
        }

        async fn delete_by_file_id(&self, file_id: &str) -> Result<(), StoreError> {
            self.calls.lock().unwrap().push(format!("delete:{file_id}"));
            Ok(())
        }

        async fn upsert_document(
            &self,
            doc_id: &str,
            source: &str,
            _text: &str,
            payload: &Map<String, Value>,
        ) -> Result<usize, StoreError> {
            self.calls.lock().unwrap().push(format!(
                "upsert:{doc_id}:{source}:{}:{}",
                payload["file_type"].as_str().unwrap_or(""),
                payload["file_name"].as_str().unwrap_or(""),
            ));
            Ok(1)
        }
    }

    struct FakeProvider {
        files: Vec<FileDescriptor>,
        settings: Arc<Settings>,
    }

    #[async_trait]
    impl StorageProvider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake_drive"
        }

        async fn list_files(
            &self,
            _filter: &crate::provider::FileTypeFilter,
            _limiter: &Arc<RateLimiter>,
            _stop: &ShutdownSignal,
        ) -> Result<Vec<FileDescriptor>, DriveError> {
            Ok(self.files.clone())
        }

        fn build_extraction_context(
            &self,
            limiter: Arc<RateLimiter>,
            stop: ShutdownSignal,
        ) -> ExtractionContext {
            // Points at a dead address; stub extractors never dial out.
            let client = DriveClient::with_bases(
                reqwest::Client::new(),
                TokenSource::fixed("test"),
                "http://127.0.0.1:1/drive",
                "http://127.0.0.1:1/docs",
                "http://127.0.0.1:1/sheets",
                "http://127.0.0.1:1/slides",
            );
            ExtractionContext::new(
                Arc::new(client),
                limiter,
                stop,
                Arc::clone(&self.settings),
                BackoffPolicy::default(),
            )
        }
    }

    /// Extractor double with a scripted outcome per call.
    enum StubOutcome {
        Text(&'static str, &'static str),
        DecodeError,
        Shutdown,
    }

    struct StubExtractor {
        outcome: StubOutcome,
    }

    #[async_trait]
    impl Extractor for StubExtractor {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn mime_types(&self) -> &[&'static str] {
            &["text/plain"]
        }

        fn file_extensions(&self) -> &[&'static str] {
            &["py", "txt"]
        }

        fn can_extract(&self, file: &FileDescriptor) -> bool {
            file.effective_extension()
                .is_some_and(|ext| ext == "py" || ext == "txt")
        }

        async fn extract(
            &self,
            _file: &FileDescriptor,
            _ctx: &ExtractionContext,
        ) -> Result<ExtractedContent, ExtractError> {
            match self.outcome {
                StubOutcome::Text(text, file_type) => Ok(ExtractedContent::new(text, file_type)),
                StubOutcome::DecodeError => Err(ExtractError::Decode {
                    format: "stub",
                    message: "scripted failure".to_string(),
                }),
                StubOutcome::Shutdown => {
                    Err(ExtractError::from(crate::shutdown::ShutdownRequested))
                }
            }
        }
    }

    fn leaked_registry(outcome: StubOutcome) -> &'static ExtractorRegistry {
        let mut registry = ExtractorRegistry::new();
        registry.register(Arc::new(StubExtractor { outcome }));
        Box::leak(Box::new(registry))
    }

    fn service(
        store: Arc<RecordingStore>,
        files: Vec<FileDescriptor>,
        registry: &'static ExtractorRegistry,
    ) -> (IngestService, Arc<RateLimiter>, ShutdownSignal) {
        let settings = test_settings();
        let stop = ShutdownSignal::new();
        let limiter = Arc::new(RateLimiter::new(1000.0, 1000.0, stop.clone()));
        let provider = Arc::new(FakeProvider {
            files,
            settings: Arc::clone(&settings),
        });
        (
            IngestService::new(store, provider, registry, settings),
            limiter,
            stop,
        )
    }

    #[tokio::test]
    async fn test_unchanged_file_is_skipped_without_writes() {
        let store = Arc::new(RecordingStore {
            exists: true,
            ..RecordingStore::default()
        });
        let registry = leaked_registry(StubOutcome::Text("body", "text"));
        let files = vec![descriptor(
            "F1",
            "a.txt",
            "text/plain",
            Some("2024-01-01T00:00:00Z"),
        )];
        let (service, limiter, stop) = service(Arc::clone(&store), files, registry);

        let stats = service.run_once(&limiter, &stop).await.unwrap();

        assert_eq!(stats.skipped_unchanged, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(
            store.calls(),
            vec!["exists:F1:2024-01-01T00:00:00Z".to_string()]
        );
    }

    #[tokio::test]
    async fn test_successful_ingest_deletes_before_upsert() {
        let store = Arc::new(RecordingStore::default());
        let registry = leaked_registry(StubOutcome::Text("print('ok')\n", "python"));
        let files = vec![descriptor("F2", "n.py", "text/plain", Some("2024-02-02"))];
        let (service, limiter, stop) = service(Arc::clone(&store), files, registry);

        let stats = service.run_once(&limiter, &stop).await.unwrap();

        assert_eq!(stats.ok, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(
            store.calls(),
            vec![
                "exists:F2:2024-02-02".to_string(),
                "delete:F2".to_string(),
                "upsert:F2:fake_drive:python:n.py".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_mtime_is_always_changed() {
        let store = Arc::new(RecordingStore {
            exists: true,
            ..RecordingStore::default()
        });
        let registry = leaked_registry(StubOutcome::Text("body", "text"));
        let files = vec![descriptor("F3", "a.txt", "text/plain", None)];
        let (service, limiter, stop) = service(Arc::clone(&store), files, registry);

        let stats = service.run_once(&limiter, &stop).await.unwrap();

        // No existence check happens without a version token.
        assert_eq!(stats.ok, 1);
        assert!(store.calls().iter().all(|call| !call.starts_with("exists")));
    }

    #[tokio::test]
    async fn test_unsupported_file_type_is_counted() {
        let store = Arc::new(RecordingStore::default());
        let registry = leaked_registry(StubOutcome::Text("body", "text"));
        let files = vec![descriptor("F4", "movie.mkv", "video/x-matroska", None)];
        let (service, limiter, stop) = service(Arc::clone(&store), files, registry);

        let stats = service.run_once(&limiter, &stop).await.unwrap();

        assert_eq!(stats.skipped_unsupported, 1);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_whitespace_text_is_skipped_empty() {
        let store = Arc::new(RecordingStore::default());
        let registry = leaked_registry(StubOutcome::Text("  \n\t ", "text"));
        let files = vec![descriptor("F5", "a.txt", "text/plain", None)];
        let (service, limiter, stop) = service(Arc::clone(&store), files, registry);

        let stats = service.run_once(&limiter, &stop).await.unwrap();

        assert_eq!(stats.skipped_empty, 1);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_extractor_failure_counts_failed_and_run_continues() {
        let store = Arc::new(RecordingStore::default());
        let registry = leaked_registry(StubOutcome::DecodeError);
        let files = vec![
            descriptor("F6", "a.txt", "text/plain", None),
            descriptor("F7", "b.txt", "text/plain", None),
        ];
        let (service, limiter, stop) = service(Arc::clone(&store), files, registry);

        let stats = service.run_once(&limiter, &stop).await.unwrap();

        assert_eq!(stats.failed, 2);
        assert_eq!(stats.completed, 2);
        assert!(!stop.is_set());
    }

    #[tokio::test]
    async fn test_worker_shutdown_sets_stop_and_halts_submission() {
        let store = Arc::new(RecordingStore::default());
        let registry = leaked_registry(StubOutcome::Shutdown);
        let files = vec![
            descriptor("F8", "a.txt", "text/plain", None),
            descriptor("F9", "b.txt", "text/plain", None),
            descriptor("F10", "c.txt", "text/plain", None),
        ];

        let settings = Arc::new(
            Settings::from_lookup(|name| match name {
                "STORAGE_GOOGLE_DRIVE_ALL_ACCESSIBLE" => Some("true".to_string()),
                "INGEST_WORKERS" => Some("1".to_string()),
                _ => None,
            })
            .unwrap(),
        );
        let stop = ShutdownSignal::new();
        let limiter = Arc::new(RateLimiter::new(1000.0, 1000.0, stop.clone()));
        let provider = Arc::new(FakeProvider {
            files,
            settings: Arc::clone(&settings),
        });
        let service = IngestService::new(
            Arc::clone(&store) as Arc<dyn IngestStore>,
            provider,
            registry,
            settings,
        );

        let stats = service.run_once(&limiter, &stop).await.unwrap();

        assert!(stop.is_set());
        assert_eq!(stats.skipped_stopped, 1);
        // With a single worker, the stop set by the first completion prevents
        // every later submission.
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total, 3);
    }

    #[tokio::test]
    async fn test_pre_set_stop_submits_nothing() {
        let store = Arc::new(RecordingStore::default());
        let registry = leaked_registry(StubOutcome::Text("body", "text"));
        let files = vec![
            descriptor("F11", "a.txt", "text/plain", None),
            descriptor("F12", "b.txt", "text/plain", None),
        ];
        let (service, limiter, stop) = service(Arc::clone(&store), files, registry);
        stop.set();

        let stats = service.run_once(&limiter, &stop).await.unwrap();

        assert_eq!(stats.completed, 0);
        assert_eq!(stats.total, 2);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_listing_short_circuits() {
        let store = Arc::new(RecordingStore::default());
        let registry = leaked_registry(StubOutcome::Text("body", "text"));
        let (service, limiter, stop) = service(Arc::clone(&store), Vec::new(), registry);

        let stats = service.run_once(&limiter, &stop).await.unwrap();
        assert_eq!(stats, RunStats::default());
    }

    #[tokio::test]
    async fn test_run_loop_exits_promptly_on_stop() {
        let store = Arc::new(RecordingStore::default());
        let registry = leaked_registry(StubOutcome::Text("body", "text"));
        let (service, limiter, stop) = service(Arc::clone(&store), Vec::new(), registry);

        let loop_stop = stop.clone();
        let handle = tokio::spawn(async move {
            service.run_loop(&limiter, &loop_stop).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.set();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("run_loop should exit promptly after stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
