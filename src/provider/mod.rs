//! Storage provider contracts.
//!
//! These are the shared value types and the narrow seam between the
//! orchestrator and a concrete remote drive: a provider lists normalized
//! [`FileDescriptor`]s matching a [`FileTypeFilter`] and hands out extraction
//! contexts. Extractors and the orchestrator never see provider-native types
//! beyond the opaque `raw` attribute bag.

pub mod google_drive;

pub use google_drive::GoogleDriveProvider;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::{Settings, StorageBackend};
use crate::drive::{AuthError, DriveClient, DriveError, TokenSource};
use crate::extract::ExtractionContext;
use crate::limiter::RateLimiter;
use crate::shutdown::ShutdownSignal;

/// Normalized metadata for one remote file.
///
/// `id` is stable across listings for the same logical file. `modified_time`
/// is an opaque version token: equal tokens mean unchanged content for skip
/// decisions, and nothing else is assumed about it.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    /// Provider-unique, non-empty id.
    pub id: String,
    /// Display name; may be absent.
    pub name: Option<String>,
    /// MIME type reported by the provider.
    pub mime_type: Option<String>,
    /// Opaque version token.
    pub modified_time: Option<String>,
    /// Size in bytes, when the provider reports one.
    pub size_bytes: Option<u64>,
    /// Lowercased extension without the leading dot.
    pub extension: Option<String>,
    /// Provider-native attribute bag, passed through to extractors untouched.
    pub raw: Map<String, Value>,
}

impl FileDescriptor {
    /// Name for logs, falling back to the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or(&self.id)
    }

    /// Extension from provider metadata, falling back to the name suffix.
    #[must_use]
    pub fn effective_extension(&self) -> Option<String> {
        if let Some(ext) = self.extension.as_deref() {
            let ext = ext.trim().trim_start_matches('.').to_lowercase();
            if !ext.is_empty() {
                return Some(ext);
            }
        }

        let name = self.name.as_deref()?;
        let (_, suffix) = name.rsplit_once('.')?;
        let suffix = suffix.trim().to_lowercase();
        (!suffix.is_empty()).then_some(suffix)
    }
}

/// Declarative capability set used to bound provider listings.
///
/// A descriptor matches iff its MIME is in `mime_types`, OR its MIME starts
/// with any of `mime_prefixes`, OR its extension is in `extensions`. The
/// empty filter matches nothing.
#[derive(Debug, Clone, Default)]
pub struct FileTypeFilter {
    pub mime_types: Vec<String>,
    pub mime_prefixes: Vec<String>,
    pub extensions: Vec<String>,
}

impl FileTypeFilter {
    /// Returns whether the filter can match anything at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mime_types.is_empty() && self.mime_prefixes.is_empty() && self.extensions.is_empty()
    }

    /// Tests one descriptor against the filter.
    #[must_use]
    pub fn matches(&self, file: &FileDescriptor) -> bool {
        let mime = file.mime_type.as_deref().unwrap_or("");

        if self.mime_types.iter().any(|m| m == mime) {
            return true;
        }
        if self
            .mime_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && mime.starts_with(prefix.as_str()))
        {
            return true;
        }

        match file.effective_extension() {
            Some(ext) => self.extensions.iter().any(|e| e.to_lowercase() == ext),
            None => false,
        }
    }
}

/// A concrete remote drive.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Short provider name, recorded as `source` in stored payloads.
    fn name(&self) -> &'static str;

    /// Lists candidate files matching `filter`. Finite; the listing stops
    /// early (without error) when the shutdown signal is set.
    ///
    /// # Errors
    ///
    /// Listing failures (pagination, auth) abort the ingest run.
    async fn list_files(
        &self,
        filter: &FileTypeFilter,
        limiter: &Arc<RateLimiter>,
        stop: &ShutdownSignal,
    ) -> Result<Vec<FileDescriptor>, DriveError>;

    /// Builds a fresh per-file extraction context.
    fn build_extraction_context(
        &self,
        limiter: Arc<RateLimiter>,
        stop: ShutdownSignal,
    ) -> ExtractionContext;
}

/// Instantiates the configured storage backend.
///
/// # Errors
///
/// Fails when the backend's credentials cannot be loaded.
pub fn build_provider(settings: Arc<Settings>) -> Result<Arc<dyn StorageProvider>, AuthError> {
    match settings.storage_backend {
        StorageBackend::GoogleDrive => {
            let http = reqwest::Client::new();
            let token = TokenSource::service_account(&settings.service_account_json, http.clone())?;
            let client = Arc::new(DriveClient::new(http, token));
            Ok(Arc::new(GoogleDriveProvider::new(client, settings)))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn descriptor(mime: Option<&str>, name: Option<&str>, ext: Option<&str>) -> FileDescriptor {
        FileDescriptor {
            id: "f1".to_string(),
            name: name.map(String::from),
            mime_type: mime.map(String::from),
            modified_time: None,
            size_bytes: None,
            extension: ext.map(String::from),
            raw: Map::new(),
        }
    }

    fn filter() -> FileTypeFilter {
        FileTypeFilter {
            mime_types: vec!["application/pdf".to_string()],
            mime_prefixes: vec!["text/".to_string()],
            extensions: vec!["py".to_string(), "rs".to_string()],
        }
    }

    #[test]
    fn test_filter_matches_exact_mime() {
        assert!(filter().matches(&descriptor(Some("application/pdf"), None, None)));
    }

    #[test]
    fn test_filter_matches_mime_prefix() {
        assert!(filter().matches(&descriptor(Some("text/x-kotlin"), None, None)));
    }

    #[test]
    fn test_filter_matches_extension_case_insensitively() {
        assert!(filter().matches(&descriptor(Some("application/octet-stream"), None, Some("PY"))));
    }

    #[test]
    fn test_filter_falls_back_to_name_suffix() {
        assert!(filter().matches(&descriptor(None, Some("lib.rs"), None)));
    }

    #[test]
    fn test_filter_rejects_unknown() {
        assert!(!filter().matches(&descriptor(Some("application/zip"), Some("a.zip"), None)));
    }

    #[test]
    fn test_empty_filter_matches_nothing() {
        let empty = FileTypeFilter::default();
        assert!(empty.is_empty());
        assert!(!empty.matches(&descriptor(Some("text/plain"), Some("a.txt"), Some("txt"))));
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        assert_eq!(descriptor(None, None, None).display_name(), "f1");
        assert_eq!(descriptor(None, Some(""), None).display_name(), "f1");
        assert_eq!(descriptor(None, Some("a.txt"), None).display_name(), "a.txt");
    }

    #[test]
    fn test_effective_extension_prefers_metadata() {
        let file = descriptor(None, Some("report.pdf"), Some(".TXT"));
        assert_eq!(file.effective_extension().as_deref(), Some("txt"));
    }

    #[test]
    fn test_effective_extension_requires_a_dot() {
        assert_eq!(descriptor(None, Some("README"), None).effective_extension(), None);
    }
}
