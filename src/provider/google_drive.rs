//! Google Drive storage provider.
//!
//! Two listing modes:
//!
//! - **Scoped walk** over configured root folders: iterative DFS with an
//!   explicit stack and a `seen` set (cycle-safe), skipping trashed items via
//!   the query and shortcuts via an explicit check.
//! - **Global scope** over everything the service account can read, with the
//!   capability filter compiled into a Drive `q` expression.
//!
//! Every page fetch goes through the backoff executor; the shutdown signal is
//! checked at page boundaries and between entries.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backoff::{BackoffPolicy, execute_with_backoff};
use crate::config::Settings;
use crate::drive::{DriveClient, DriveError, FOLDER_MIME, SHORTCUT_MIME};
use crate::extract::ExtractionContext;
use crate::limiter::RateLimiter;
use crate::shutdown::ShutdownSignal;

use super::{FileDescriptor, FileTypeFilter, StorageProvider};

/// Drive-backed [`StorageProvider`].
#[derive(Debug)]
pub struct GoogleDriveProvider {
    client: Arc<DriveClient>,
    settings: Arc<Settings>,
    backoff: BackoffPolicy,
}

impl GoogleDriveProvider {
    /// Creates the provider around a shared API client.
    #[must_use]
    pub fn new(client: Arc<DriveClient>, settings: Arc<Settings>) -> Self {
        let backoff = settings.backoff_policy();
        Self {
            client,
            settings,
            backoff,
        }
    }

    /// Fetches all children of one folder, following pagination to the end.
    async fn list_children(
        &self,
        parent_id: &str,
        limiter: &RateLimiter,
        stop: &ShutdownSignal,
    ) -> Result<Vec<Value>, DriveError> {
        let query = format!("'{parent_id}' in parents and trashed=false");
        self.list_pages(&query, limiter, stop).await
    }

    /// Fetches every page for `query`.
    async fn list_pages(
        &self,
        query: &str,
        limiter: &RateLimiter,
        stop: &ShutdownSignal,
    ) -> Result<Vec<Value>, DriveError> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            // Stopping yields the partial listing; not an error.
            if stop.is_set() {
                break;
            }

            let token = page_token.clone();
            let page = execute_with_backoff(&self.backoff, limiter, stop, || {
                let token = token.clone();
                async move { self.client.list_files_page(query, token.as_deref()).await }
            })
            .await?;

            files.extend(page.files);
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(files)
    }

    /// Iterative DFS from the configured roots.
    async fn walk_recursive(
        &self,
        limiter: &RateLimiter,
        stop: &ShutdownSignal,
        filter: &FileTypeFilter,
    ) -> Result<Vec<FileDescriptor>, DriveError> {
        let mut stack: Vec<String> = self.settings.folder_ids.clone();
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();

        while let Some(folder_id) = stack.pop() {
            if stop.is_set() {
                break;
            }
            // A folder reachable through two paths (or a back-edge) is walked once.
            if !seen.insert(folder_id.clone()) {
                continue;
            }

            for entry in self.list_children(&folder_id, limiter, stop).await? {
                if stop.is_set() {
                    break;
                }

                let mime = entry.get("mimeType").and_then(Value::as_str).unwrap_or("");
                if mime == FOLDER_MIME {
                    if let Some(id) = entry.get("id").and_then(Value::as_str) {
                        stack.push(id.to_string());
                    }
                } else if mime == SHORTCUT_MIME {
                    debug!(
                        component = "ingest",
                        flow = "walk_recursive",
                        file_id = entry.get("id").and_then(serde_json::Value::as_str).unwrap_or(""),
                        file_name = entry.get("name").and_then(serde_json::Value::as_str).unwrap_or(""),
                        "shortcut_skipped"
                    );
                } else {
                    let file = to_descriptor(&entry);
                    if filter.matches(&file) {
                        out.push(file);
                    }
                }
            }
        }

        Ok(out)
    }

    /// Single filtered listing across everything accessible.
    async fn list_all_accessible(
        &self,
        limiter: &RateLimiter,
        stop: &ShutdownSignal,
        filter: &FileTypeFilter,
    ) -> Result<Vec<FileDescriptor>, DriveError> {
        let terms = build_query_terms(filter);
        let query = if terms.is_empty() {
            "trashed=false".to_string()
        } else {
            format!("trashed=false and ({})", terms.join(" or "))
        };

        let files = self.list_pages(&query, limiter, stop).await?;
        Ok(files
            .iter()
            .filter(|entry| {
                entry.get("mimeType").and_then(Value::as_str) != Some(SHORTCUT_MIME)
            })
            .map(to_descriptor)
            .filter(|file| filter.matches(file))
            .collect())
    }
}

#[async_trait]
impl StorageProvider for GoogleDriveProvider {
    fn name(&self) -> &'static str {
        "google_drive"
    }

    async fn list_files(
        &self,
        filter: &FileTypeFilter,
        limiter: &Arc<RateLimiter>,
        stop: &ShutdownSignal,
    ) -> Result<Vec<FileDescriptor>, DriveError> {
        if self.settings.all_accessible {
            let files = self.list_all_accessible(limiter, stop, filter).await?;
            warn!(
                component = "ingest",
                flow = "ingest_scope",
                files = files.len(),
                all_accessible = true,
                "all_accessible_enabled"
            );
            Ok(files)
        } else {
            let files = self.walk_recursive(limiter, stop, filter).await?;
            info!(
                component = "ingest",
                flow = "ingest_scope",
                roots = ?self.settings.folder_ids,
                files = files.len(),
                all_accessible = false,
                "folder_recursive_scope"
            );
            Ok(files)
        }
    }

    fn build_extraction_context(
        &self,
        limiter: Arc<RateLimiter>,
        stop: ShutdownSignal,
    ) -> ExtractionContext {
        ExtractionContext::new(
            Arc::clone(&self.client),
            limiter,
            stop,
            Arc::clone(&self.settings),
            self.backoff,
        )
    }
}

/// Normalizes one raw Drive entry.
fn to_descriptor(entry: &Value) -> FileDescriptor {
    let raw = entry.as_object().cloned().unwrap_or_default();

    // Drive reports `size` as a decimal string.
    let size_bytes = match entry.get("size") {
        Some(Value::String(s)) => s.parse::<u64>().ok(),
        Some(Value::Number(n)) => n.as_u64(),
        _ => None,
    };

    let extension = entry
        .get("fileExtension")
        .and_then(Value::as_str)
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty());

    FileDescriptor {
        id: entry
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        name: entry.get("name").and_then(Value::as_str).map(String::from),
        mime_type: entry.get("mimeType").and_then(Value::as_str).map(String::from),
        modified_time: entry
            .get("modifiedTime")
            .and_then(Value::as_str)
            .map(String::from),
        size_bytes,
        extension,
        raw,
    }
}

/// Compiles the capability filter into Drive `q` terms.
fn build_query_terms(filter: &FileTypeFilter) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();

    for mime in &filter.mime_types {
        terms.push(format!("mimeType='{mime}'"));
    }

    let mut prefixes: Vec<&String> = filter.mime_prefixes.iter().collect();
    prefixes.sort();
    for prefix in prefixes {
        terms.push(format!("mimeType contains '{prefix}'"));
    }

    let mut extensions: Vec<String> = filter
        .extensions
        .iter()
        .map(|ext| ext.to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect();
    extensions.sort();
    extensions.dedup();
    for ext in extensions {
        terms.push(format!("fileExtension='{ext}'"));
        terms.push(format!("name contains '.{ext}'"));
    }

    terms
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_to_descriptor_parses_string_size_and_extension() {
        let entry = json!({
            "id": "f1",
            "name": "Report.PDF",
            "mimeType": "application/pdf",
            "modifiedTime": "2024-01-01T00:00:00Z",
            "size": "2048",
            "fileExtension": "PDF",
        });

        let file = to_descriptor(&entry);
        assert_eq!(file.id, "f1");
        assert_eq!(file.size_bytes, Some(2048));
        assert_eq!(file.extension.as_deref(), Some("pdf"));
        assert_eq!(file.modified_time.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(file.raw.get("name").and_then(Value::as_str), Some("Report.PDF"));
    }

    #[test]
    fn test_to_descriptor_tolerates_missing_fields() {
        let file = to_descriptor(&json!({"id": "f2"}));
        assert_eq!(file.id, "f2");
        assert!(file.name.is_none());
        assert!(file.size_bytes.is_none());
        assert!(file.extension.is_none());
    }

    #[test]
    fn test_query_terms_cover_all_three_capability_sets() {
        let filter = FileTypeFilter {
            mime_types: vec!["application/pdf".to_string()],
            mime_prefixes: vec!["text/".to_string()],
            extensions: vec!["py".to_string(), "PY".to_string(), "md".to_string()],
        };

        let terms = build_query_terms(&filter);
        assert!(terms.contains(&"mimeType='application/pdf'".to_string()));
        assert!(terms.contains(&"mimeType contains 'text/'".to_string()));
        assert!(terms.contains(&"fileExtension='py'".to_string()));
        assert!(terms.contains(&"name contains '.py'".to_string()));
        assert!(terms.contains(&"fileExtension='md'".to_string()));

        // Duplicate extensions collapse to one pair of terms.
        let py_terms = terms.iter().filter(|t| t.contains("'py'")).count();
        assert_eq!(py_terms, 1);
    }

    #[test]
    fn test_empty_filter_compiles_to_no_terms() {
        assert!(build_query_terms(&FileTypeFilter::default()).is_empty());
    }
}
