//! Environment-driven service configuration.
//!
//! Every option is read from the environment at startup, validated against
//! its documented range, and frozen into a [`Settings`] snapshot shared across
//! the process. Validation failures are fatal and name the offending variable
//! and the accepted range.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::backoff::BackoffPolicy;

const MAX_TOP_K: u64 = 50;
const MIN_CONTEXT_CHARS: u64 = 500;
const MAX_CONTEXT_CHARS: u64 = 100_000;
const MAX_WORKERS: u64 = 64;
const MAX_RPS: f64 = 1000.0;
const MAX_BURST: f64 = 10_000.0;
const MAX_PROGRESS_FILES: u64 = 10_000;
const MAX_PROGRESS_SECONDS: u64 = 3600;
const MAX_SHUTDOWN_GRACE_SECONDS: u64 = 600;
const MAX_POLL_SECONDS: u64 = 86_400;

/// Configuration failure. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable was present but failed parsing or range validation.
    #[error("{name} must be {expected} (got {value:?})")]
    Invalid {
        /// The environment variable name.
        name: &'static str,
        /// Human-readable description of the accepted values.
        expected: String,
        /// The rejected raw value.
        value: String,
    },

    /// The drive backend was selected without any listing scope.
    #[error(
        "set STORAGE_GOOGLE_DRIVE_FOLDER_IDS (JSON array of folder ids) or \
         STORAGE_GOOGLE_DRIVE_ALL_ACCESSIBLE=true"
    )]
    MissingDriveScope,
}

impl ConfigError {
    fn invalid(name: &'static str, expected: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            expected: expected.into(),
            value: value.into(),
        }
    }
}

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Google Drive via a service account.
    GoogleDrive,
}

impl StorageBackend {
    /// Canonical configuration name of the backend.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GoogleDrive => "google_drive",
        }
    }
}

/// PDF text extraction engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfEngine {
    /// The `pdf-extract` crate (layout-aware, default).
    PdfExtract,
    /// Raw per-page text via `lopdf`.
    Lopdf,
}

impl PdfEngine {
    /// Canonical configuration name of the engine.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PdfExtract => "pdf-extract",
            Self::Lopdf => "lopdf",
        }
    }
}

/// Run mode for the ingestion daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// One pass, then exit.
    Once,
    /// Poll forever until signaled.
    Loop,
}

impl IngestMode {
    /// Canonical configuration name of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Loop => "loop",
        }
    }
}

/// Per-format extractor toggles (`FILE_TYPE_*_ENABLED`).
#[derive(Debug, Clone, Copy)]
pub struct FileTypeToggles {
    pub gdocs: bool,
    pub gsheets: bool,
    pub gslides: bool,
    pub text: bool,
    pub pdf: bool,
    pub docx: bool,
    pub doc: bool,
    pub xlsx: bool,
    pub xls: bool,
    pub pptx: bool,
    pub ppt: bool,
}

/// Immutable settings snapshot shared across the process.
#[derive(Debug, Clone)]
pub struct Settings {
    pub storage_backend: StorageBackend,
    pub service_account_json: PathBuf,
    pub folder_ids: Vec<String>,
    pub all_accessible: bool,
    pub max_rows_per_sheet: u32,
    pub backoff_retries: u32,
    pub backoff_base_delay: Duration,
    pub backoff_max_delay: Duration,
    pub api_rps: f64,
    pub api_burst: f64,
    pub file_types: FileTypeToggles,
    pub text_max_file_size_mb: f64,
    pub pdf_max_file_size_mb: f64,
    pub office_max_file_size_mb: f64,
    pub pdf_max_pages: u32,
    pub excel_max_sheets: u32,
    pub pdf_engine: PdfEngine,
    pub qdrant_url: String,
    pub qdrant_collection: String,
    pub embed_base_url: String,
    pub embed_model: String,
    pub embed_api_key: Option<String>,
    pub top_k: usize,
    pub max_context_chars: usize,
    pub chunk_chars: usize,
    pub chunk_overlap: usize,
    pub ingest_mode: IngestMode,
    pub poll_seconds: u64,
    pub workers: usize,
    pub progress_files: u64,
    pub progress_seconds: u64,
    pub shutdown_grace_seconds: u64,
    pub health_host: String,
    pub bot_health_port: i32,
    pub ingest_health_port: i32,
    pub log_level: String,
    pub log_plain_text: bool,
}

impl Settings {
    /// Loads and validates settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the variable and the accepted range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads settings from an arbitrary variable source (used by tests).
    ///
    /// # Errors
    ///
    /// Same as [`Settings::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let settings = Self {
            storage_backend: parse_backend(&lookup)?,
            service_account_json: PathBuf::from(
                get(&lookup, "STORAGE_GOOGLE_DRIVE_SERVICE_ACCOUNT_JSON")
                    .unwrap_or_else(|| "/run/secrets/google_sa".to_string()),
            ),
            folder_ids: parse_folder_ids(&lookup)?,
            all_accessible: parse_bool(&lookup, "STORAGE_GOOGLE_DRIVE_ALL_ACCESSIBLE", false)?,
            max_rows_per_sheet: parse_int(
                &lookup,
                "STORAGE_GOOGLE_DRIVE_MAX_ROWS_PER_SHEET",
                2000,
                1,
                1_000_000,
            )? as u32,
            backoff_retries: parse_int(&lookup, "STORAGE_GOOGLE_DRIVE_BACKOFF_RETRIES", 8, 0, 100)?
                as u32,
            backoff_base_delay: Duration::from_secs_f64(parse_float(
                &lookup,
                "STORAGE_GOOGLE_DRIVE_BACKOFF_BASE_DELAY_SECONDS",
                1.0,
                f64::MIN_POSITIVE,
                3600.0,
            )?),
            backoff_max_delay: Duration::from_secs_f64(parse_float(
                &lookup,
                "STORAGE_GOOGLE_DRIVE_BACKOFF_MAX_DELAY_SECONDS",
                30.0,
                f64::MIN_POSITIVE,
                3600.0,
            )?),
            api_rps: parse_float(
                &lookup,
                "STORAGE_GOOGLE_DRIVE_API_RPS",
                8.0,
                f64::MIN_POSITIVE,
                MAX_RPS,
            )?,
            api_burst: parse_float(&lookup, "STORAGE_GOOGLE_DRIVE_API_BURST", 16.0, 1.0, MAX_BURST)?,
            file_types: FileTypeToggles {
                gdocs: parse_bool(&lookup, "FILE_TYPE_GDOCS_ENABLED", true)?,
                gsheets: parse_bool(&lookup, "FILE_TYPE_GSHEETS_ENABLED", true)?,
                gslides: parse_bool(&lookup, "FILE_TYPE_GSLIDES_ENABLED", true)?,
                text: parse_bool(&lookup, "FILE_TYPE_TEXT_ENABLED", true)?,
                pdf: parse_bool(&lookup, "FILE_TYPE_PDF_ENABLED", true)?,
                docx: parse_bool(&lookup, "FILE_TYPE_DOCX_ENABLED", true)?,
                doc: parse_bool(&lookup, "FILE_TYPE_DOC_ENABLED", true)?,
                xlsx: parse_bool(&lookup, "FILE_TYPE_XLSX_ENABLED", true)?,
                xls: parse_bool(&lookup, "FILE_TYPE_XLS_ENABLED", true)?,
                pptx: parse_bool(&lookup, "FILE_TYPE_PPTX_ENABLED", true)?,
                ppt: parse_bool(&lookup, "FILE_TYPE_PPT_ENABLED", true)?,
            },
            text_max_file_size_mb: parse_float(
                &lookup,
                "TEXT_MAX_FILE_SIZE_MB",
                5.0,
                f64::MIN_POSITIVE,
                10_000.0,
            )?,
            pdf_max_file_size_mb: parse_float(
                &lookup,
                "PDF_MAX_FILE_SIZE_MB",
                50.0,
                f64::MIN_POSITIVE,
                10_000.0,
            )?,
            office_max_file_size_mb: parse_float(
                &lookup,
                "OFFICE_MAX_FILE_SIZE_MB",
                30.0,
                f64::MIN_POSITIVE,
                10_000.0,
            )?,
            pdf_max_pages: parse_int(&lookup, "PDF_MAX_PAGES", 300, 0, 100_000)? as u32,
            excel_max_sheets: parse_int(&lookup, "EXCEL_MAX_SHEETS", 20, 0, 10_000)? as u32,
            pdf_engine: parse_pdf_engine(&lookup)?,
            qdrant_url: get(&lookup, "QDRANT_URL").unwrap_or_else(|| "http://qdrant:6333".to_string()),
            qdrant_collection: parse_non_empty(&lookup, "QDRANT_COLLECTION", "docs")?,
            embed_base_url: get(&lookup, "EMBED_BASE_URL")
                .unwrap_or_else(|| "http://embedder:8000/v1".to_string()),
            embed_model: get(&lookup, "EMBED_MODEL").unwrap_or_else(|| {
                "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2".to_string()
            }),
            embed_api_key: get(&lookup, "EMBED_API_KEY"),
            top_k: parse_int(&lookup, "TOP_K", 6, 1, MAX_TOP_K)? as usize,
            max_context_chars: parse_int(
                &lookup,
                "MAX_CONTEXT_CHARS",
                6000,
                MIN_CONTEXT_CHARS,
                MAX_CONTEXT_CHARS,
            )? as usize,
            chunk_chars: parse_int(&lookup, "CHUNK_CHARS", 900, 1, 1_000_000)? as usize,
            chunk_overlap: parse_int(&lookup, "CHUNK_OVERLAP", 120, 0, 1_000_000)? as usize,
            ingest_mode: parse_mode(&lookup)?,
            poll_seconds: parse_int(&lookup, "INGEST_POLL_SECONDS", 600, 1, MAX_POLL_SECONDS)?,
            workers: parse_int(&lookup, "INGEST_WORKERS", 6, 1, MAX_WORKERS)? as usize,
            progress_files: parse_int(&lookup, "INGEST_PROGRESS_FILES", 25, 1, MAX_PROGRESS_FILES)?,
            progress_seconds: parse_int(
                &lookup,
                "INGEST_PROGRESS_SECONDS",
                30,
                1,
                MAX_PROGRESS_SECONDS,
            )?,
            shutdown_grace_seconds: parse_int(
                &lookup,
                "INGEST_SHUTDOWN_GRACE_SECONDS",
                20,
                0,
                MAX_SHUTDOWN_GRACE_SECONDS,
            )?,
            health_host: get(&lookup, "HEALTH_HOST").unwrap_or_else(|| "localhost".to_string()),
            bot_health_port: parse_port(&lookup, "BOT_HEALTH_PORT", 8080)?,
            ingest_health_port: parse_port(&lookup, "INGEST_HEALTH_PORT", 8081)?,
            log_level: parse_log_level(&lookup)?,
            log_plain_text: parse_bool(&lookup, "LOG_PLAIN_TEXT", false)?,
        };

        if settings.chunk_overlap >= settings.chunk_chars {
            return Err(ConfigError::invalid(
                "CHUNK_OVERLAP",
                format!("less than CHUNK_CHARS ({})", settings.chunk_chars),
                settings.chunk_overlap.to_string(),
            ));
        }

        if settings.storage_backend == StorageBackend::GoogleDrive
            && !settings.all_accessible
            && settings.folder_ids.is_empty()
        {
            return Err(ConfigError::MissingDriveScope);
        }

        Ok(settings)
    }

    /// Backoff schedule for remote API calls.
    #[must_use]
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.backoff_retries,
            self.backoff_base_delay,
            self.backoff_max_delay,
        )
    }

    /// Byte cap for plain-text downloads.
    #[must_use]
    pub fn text_max_bytes(&self) -> u64 {
        mb_to_bytes(self.text_max_file_size_mb)
    }

    /// Byte cap for PDF downloads.
    #[must_use]
    pub fn pdf_max_bytes(&self) -> u64 {
        mb_to_bytes(self.pdf_max_file_size_mb)
    }

    /// Byte cap for office-format downloads.
    #[must_use]
    pub fn office_max_bytes(&self) -> u64 {
        mb_to_bytes(self.office_max_file_size_mb)
    }

    /// Secret-free view of the settings, logged as the `config` event.
    #[must_use]
    pub fn safe_dump(&self) -> serde_json::Value {
        json!({
            "storage_backend": self.storage_backend.as_str(),
            "service_account_json": self.service_account_json,
            "folder_ids": self.folder_ids,
            "all_accessible": self.all_accessible,
            "max_rows_per_sheet": self.max_rows_per_sheet,
            "backoff_retries": self.backoff_retries,
            "backoff_base_delay_seconds": self.backoff_base_delay.as_secs_f64(),
            "backoff_max_delay_seconds": self.backoff_max_delay.as_secs_f64(),
            "api_rps": self.api_rps,
            "api_burst": self.api_burst,
            "pdf_engine": self.pdf_engine.as_str(),
            "qdrant_url": self.qdrant_url,
            "qdrant_collection": self.qdrant_collection,
            "embed_base_url": self.embed_base_url,
            "embed_model": self.embed_model,
            "top_k": self.top_k,
            "max_context_chars": self.max_context_chars,
            "chunk_chars": self.chunk_chars,
            "chunk_overlap": self.chunk_overlap,
            "ingest_mode": self.ingest_mode.as_str(),
            "ingest_poll_seconds": self.poll_seconds,
            "ingest_workers": self.workers,
            "ingest_progress_files": self.progress_files,
            "ingest_progress_seconds": self.progress_seconds,
            "ingest_shutdown_grace_seconds": self.shutdown_grace_seconds,
            "health_host": self.health_host,
            "bot_health_port": self.bot_health_port,
            "ingest_health_port": self.ingest_health_port,
            "log_level": self.log_level,
            "log_plain_text": self.log_plain_text,
        })
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn mb_to_bytes(mb: f64) -> u64 {
    (mb * 1024.0 * 1024.0) as u64
}

fn get(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match get(lookup, name) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::invalid(name, "a boolean (true/false/1/0)", raw)),
        },
    }
}

fn parse_int(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    match get(lookup, name) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .ok()
            .filter(|v| (min..=max).contains(v))
            .ok_or_else(|| {
                ConfigError::invalid(name, format!("an integer in [{min}..{max}]"), raw)
            }),
    }
}

fn parse_float(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: f64,
    min: f64,
    max: f64,
) -> Result<f64, ConfigError> {
    match get(lookup, name) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= min && *v <= max)
            .ok_or_else(|| {
                ConfigError::invalid(name, format!("a number in [{min}..{max}]"), raw)
            }),
    }
}

fn parse_port(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: i32,
) -> Result<i32, ConfigError> {
    match get(lookup, name) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<i32>()
            .ok()
            .filter(|v| *v <= 65_535)
            .ok_or_else(|| {
                ConfigError::invalid(name, "a port number (non-positive disables)", raw)
            }),
    }
}

fn parse_non_empty(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: &str,
) -> Result<String, ConfigError> {
    match lookup(name) {
        None => Ok(default.to_string()),
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Err(ConfigError::invalid(name, "a non-empty string", raw))
            } else {
                Ok(trimmed.to_string())
            }
        }
    }
}

fn parse_backend(lookup: &impl Fn(&str) -> Option<String>) -> Result<StorageBackend, ConfigError> {
    match get(lookup, "STORAGE_BACKEND") {
        None => Ok(StorageBackend::GoogleDrive),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "google_drive" => Ok(StorageBackend::GoogleDrive),
            _ => Err(ConfigError::invalid("STORAGE_BACKEND", "'google_drive'", raw)),
        },
    }
}

fn parse_pdf_engine(lookup: &impl Fn(&str) -> Option<String>) -> Result<PdfEngine, ConfigError> {
    match get(lookup, "PDF_EXTRACTION_ENGINE") {
        None => Ok(PdfEngine::PdfExtract),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "pdf-extract" | "pdf_extract" => Ok(PdfEngine::PdfExtract),
            "lopdf" => Ok(PdfEngine::Lopdf),
            _ => Err(ConfigError::invalid(
                "PDF_EXTRACTION_ENGINE",
                "'pdf-extract' or 'lopdf'",
                raw,
            )),
        },
    }
}

fn parse_mode(lookup: &impl Fn(&str) -> Option<String>) -> Result<IngestMode, ConfigError> {
    match get(lookup, "INGEST_MODE") {
        None => Ok(IngestMode::Loop),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "once" => Ok(IngestMode::Once),
            "loop" => Ok(IngestMode::Loop),
            _ => Err(ConfigError::invalid("INGEST_MODE", "'once' or 'loop'", raw)),
        },
    }
}

fn parse_log_level(lookup: &impl Fn(&str) -> Option<String>) -> Result<String, ConfigError> {
    match get(lookup, "LOG_LEVEL") {
        None => Ok("info".to_string()),
        Some(raw) => {
            let level = raw.to_ascii_lowercase();
            match level.as_str() {
                "trace" | "debug" | "info" | "warn" | "warning" | "error" => {
                    Ok(if level == "warning" { "warn".to_string() } else { level })
                }
                _ => Err(ConfigError::invalid(
                    "LOG_LEVEL",
                    "one of trace, debug, info, warn, error",
                    raw,
                )),
            }
        }
    }
}

/// Accepts a JSON array (the documented form) or a comma-separated list.
fn parse_folder_ids(lookup: &impl Fn(&str) -> Option<String>) -> Result<Vec<String>, ConfigError> {
    let Some(raw) = get(lookup, "STORAGE_GOOGLE_DRIVE_FOLDER_IDS") else {
        return Ok(Vec::new());
    };

    if raw.starts_with('[') {
        let ids: Vec<String> = serde_json::from_str(&raw).map_err(|_| {
            ConfigError::invalid(
                "STORAGE_GOOGLE_DRIVE_FOLDER_IDS",
                "a JSON array of folder ids",
                raw.clone(),
            )
        })?;
        Ok(ids
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect())
    } else {
        Ok(raw
            .split(',')
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect())
    }
}
