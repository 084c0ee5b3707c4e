//! File content extraction.
//!
//! Each supported format has one [`Extractor`]: a pure mapping from a file
//! descriptor (plus an [`ExtractionContext`] for remote access) to plain text
//! and typed metadata. The [`ExtractorRegistry`] dispatches on exact MIME
//! first, then scans registered extractors in order with `can_extract`.
//!
//! Registration is process-lifetime and idempotent; per-format feature flags
//! gate individual extractors from registering at all.

pub mod google;
pub mod office;
pub mod pdf;
pub mod text;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::backoff::{BackoffPolicy, execute_with_backoff};
use crate::config::Settings;
use crate::drive::{DriveClient, DriveError};
use crate::limiter::RateLimiter;
use crate::provider::{FileDescriptor, FileTypeFilter};
use crate::shutdown::{ShutdownRequested, ShutdownSignal};

/// Result of decoding one file.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    /// Cleanly trimmed UTF-8 text; empty means "nothing to index".
    pub text: String,
    /// Normalized format tag (`pdf`, `python`, `gdoc`, ...).
    pub file_type: String,
    /// Extractor metadata, merged into the stored payload.
    pub metadata: Map<String, Value>,
}

impl ExtractedContent {
    /// Content with text and no extra metadata.
    #[must_use]
    pub fn new(text: impl Into<String>, file_type: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            file_type: file_type.into(),
            metadata: Map::new(),
        }
    }

    /// Empty-text marker for files refused by a size gate.
    #[must_use]
    pub fn size_limited(file_type: impl Into<String>, size_bytes: u64) -> Self {
        let mut metadata = Map::new();
        metadata.insert("skipped".to_string(), Value::from("size_limit"));
        metadata.insert("size_bytes".to_string(), Value::from(size_bytes));
        Self {
            text: String::new(),
            file_type: file_type.into(),
            metadata,
        }
    }
}

/// Errors from decoding one file.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Remote access failed (includes shutdown interruption).
    #[error(transparent)]
    Drive(#[from] DriveError),

    /// The downloaded bytes could not be decoded as the claimed format.
    #[error("{format} decode failed: {message}")]
    Decode {
        /// Format tag of the extractor.
        format: &'static str,
        /// What went wrong.
        message: String,
    },

    /// A legacy-format decoder binary is not installed.
    #[error("legacy {format} extraction requires the '{tool}' binary")]
    MissingTool {
        /// Format tag of the extractor.
        format: &'static str,
        /// The required executable.
        tool: &'static str,
    },

    /// A legacy-format decoder exited non-zero.
    #[error("'{tool}' failed to extract {format}: {stderr}")]
    ToolFailed {
        /// The executable that failed.
        tool: &'static str,
        /// Format tag of the extractor.
        format: &'static str,
        /// Captured stderr (or "unknown error").
        stderr: String,
    },

    /// Temp-file handling for an out-of-process decoder failed.
    #[error("decoder temp file error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking decode task died.
    #[error("decode task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<ShutdownRequested> for ExtractError {
    fn from(err: ShutdownRequested) -> Self {
        Self::Drive(DriveError::Shutdown(err))
    }
}

impl ExtractError {
    /// Returns whether this failure was the shutdown signal.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Drive(err) if err.is_shutdown())
    }
}

/// Everything an extractor may touch during one file's decode: the limiter,
/// the shutdown signal, the settings snapshot, and backoff-wrapped access to
/// the remote APIs.
#[derive(Debug)]
pub struct ExtractionContext {
    drive: Arc<DriveClient>,
    limiter: Arc<RateLimiter>,
    /// Shutdown signal; extractors with long local loops may poll it.
    pub stop: ShutdownSignal,
    /// Settings snapshot for per-format caps.
    pub settings: Arc<Settings>,
    backoff: BackoffPolicy,
}

impl ExtractionContext {
    /// Builds a context. Providers call this once per file.
    #[must_use]
    pub fn new(
        drive: Arc<DriveClient>,
        limiter: Arc<RateLimiter>,
        stop: ShutdownSignal,
        settings: Arc<Settings>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            drive,
            limiter,
            stop,
            settings,
            backoff,
        }
    }

    /// Runs one remote call under the limiter and the retry policy.
    ///
    /// # Errors
    ///
    /// Surfaces the call's failure, or shutdown.
    pub async fn execute_with_backoff<T, F, Fut>(&self, call: F) -> Result<T, DriveError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DriveError>>,
    {
        execute_with_backoff(&self.backoff, &self.limiter, &self.stop, call).await
    }

    /// Downloads a binary file's bytes.
    ///
    /// # Errors
    ///
    /// Surfaces download failure or shutdown.
    pub async fn download_binary(&self, file_id: &str) -> Result<Vec<u8>, DriveError> {
        self.execute_with_backoff(|| self.drive.download_media(file_id, &self.stop))
            .await
    }

    /// Exports a hosted document to `mime_type` and returns the bytes.
    ///
    /// # Errors
    ///
    /// Surfaces download failure or shutdown.
    pub async fn download_export(&self, file_id: &str, mime_type: &str) -> Result<Vec<u8>, DriveError> {
        self.execute_with_backoff(|| self.drive.download_export(file_id, mime_type, &self.stop))
            .await
    }

    /// Fetches a Google Doc body.
    ///
    /// # Errors
    ///
    /// Surfaces the API failure or shutdown.
    pub async fn get_document(&self, document_id: &str) -> Result<Value, DriveError> {
        self.execute_with_backoff(|| self.drive.get_document(document_id))
            .await
    }

    /// Fetches spreadsheet metadata.
    ///
    /// # Errors
    ///
    /// Surfaces the API failure or shutdown.
    pub async fn get_spreadsheet(&self, spreadsheet_id: &str) -> Result<Value, DriveError> {
        self.execute_with_backoff(|| self.drive.get_spreadsheet(spreadsheet_id))
            .await
    }

    /// Fetches one A1 range of cell values.
    ///
    /// # Errors
    ///
    /// Surfaces the API failure or shutdown.
    pub async fn get_sheet_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Value, DriveError> {
        self.execute_with_backoff(|| self.drive.get_sheet_values(spreadsheet_id, range))
            .await
    }

    /// Fetches a presentation.
    ///
    /// # Errors
    ///
    /// Surfaces the API failure or shutdown.
    pub async fn get_presentation(&self, presentation_id: &str) -> Result<Value, DriveError> {
        self.execute_with_backoff(|| self.drive.get_presentation(presentation_id))
            .await
    }
}

/// One per-format decoder.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Exact MIME types this extractor owns. One MIME maps to exactly one
    /// extractor across the registry.
    fn mime_types(&self) -> &[&'static str];

    /// MIME prefixes this extractor accepts (for provider query building).
    fn mime_prefixes(&self) -> &[&'static str] {
        &[]
    }

    /// File extensions this extractor accepts.
    fn file_extensions(&self) -> &[&'static str];

    /// Fallback predicate, consulted in registration order when no exact MIME
    /// matches.
    fn can_extract(&self, file: &FileDescriptor) -> bool;

    /// Decodes one file to text plus metadata.
    async fn extract(
        &self,
        file: &FileDescriptor,
        ctx: &ExtractionContext,
    ) -> Result<ExtractedContent, ExtractError>;
}

/// Ordered collection of extractors with an exact-MIME dispatch table.
#[derive(Default)]
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
    mime_map: HashMap<String, usize>,
    /// Exact MIMEs in registration order (for capability aggregation).
    mimes: Vec<String>,
}

impl ExtractorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an extractor.
    ///
    /// # Panics
    ///
    /// Registering a second extractor for an exact MIME already claimed is a
    /// programmer error.
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        let index = self.extractors.len();
        for mime in extractor.mime_types() {
            let previous = self.mime_map.insert((*mime).to_string(), index);
            assert!(
                previous.is_none(),
                "duplicate extractor registration for MIME {mime}"
            );
            self.mimes.push((*mime).to_string());
        }
        self.extractors.push(extractor);
    }

    /// Finds the extractor for a file: exact MIME wins, then the first
    /// registered extractor whose `can_extract` accepts it.
    #[must_use]
    pub fn find(&self, file: &FileDescriptor) -> Option<&Arc<dyn Extractor>> {
        if let Some(mime) = file.mime_type.as_deref() {
            if let Some(index) = self.mime_map.get(mime) {
                return self.extractors.get(*index);
            }
        }

        self.extractors.iter().find(|e| e.can_extract(file))
    }

    /// Union of all capability sets, as a provider filter.
    #[must_use]
    pub fn file_type_filter(&self) -> FileTypeFilter {
        let mut prefixes: Vec<String> = Vec::new();
        let mut extensions: Vec<String> = Vec::new();
        for extractor in &self.extractors {
            for prefix in extractor.mime_prefixes() {
                if !prefixes.iter().any(|p| p == prefix) {
                    prefixes.push((*prefix).to_string());
                }
            }
            for ext in extractor.file_extensions() {
                if !ext.is_empty() && !extensions.iter().any(|e| e == ext) {
                    extensions.push((*ext).to_string());
                }
            }
        }

        FileTypeFilter {
            mime_types: self.mimes.clone(),
            mime_prefixes: prefixes,
            extensions,
        }
    }

    /// Number of registered extractors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    /// Returns whether no extractor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

static REGISTRY: OnceLock<ExtractorRegistry> = OnceLock::new();

/// Builds a registry for the given settings. Registration order is the
/// fallback precedence order.
#[must_use]
pub fn build_registry(settings: &Settings) -> ExtractorRegistry {
    let mut registry = ExtractorRegistry::new();
    let toggles = settings.file_types;

    if toggles.gdocs {
        registry.register(Arc::new(google::GoogleDocsExtractor));
    }
    if toggles.gsheets {
        registry.register(Arc::new(google::GoogleSheetsExtractor));
    }
    if toggles.gslides {
        registry.register(Arc::new(google::GoogleSlidesExtractor));
    }
    if toggles.text {
        registry.register(Arc::new(text::TextExtractor));
    }
    if toggles.pdf {
        registry.register(Arc::new(pdf::PdfExtractor));
    }
    if toggles.docx {
        registry.register(Arc::new(office::word::DocxExtractor));
    }
    if toggles.doc {
        registry.register(Arc::new(office::word::DocExtractor));
    }
    if toggles.xlsx {
        registry.register(Arc::new(office::excel::XlsxExtractor));
    }
    if toggles.xls {
        registry.register(Arc::new(office::excel::XlsExtractor));
    }
    if toggles.pptx {
        registry.register(Arc::new(office::powerpoint::PptxExtractor));
    }
    if toggles.ppt {
        registry.register(Arc::new(office::powerpoint::PptExtractor));
    }

    registry
}

/// Initializes the process-wide registry. Idempotent: the first call builds
/// it, later calls return the existing table untouched.
pub fn init_extractors(settings: &Settings) -> &'static ExtractorRegistry {
    REGISTRY.get_or_init(|| build_registry(settings))
}
