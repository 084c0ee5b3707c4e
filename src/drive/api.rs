//! REST client for the Google Drive family of APIs.
//!
//! One shared [`DriveClient`] (backed by a pooled `reqwest::Client`) serves
//! Drive v3 listing, media/export downloads, and the Docs/Sheets/Slides JSON
//! endpoints. Base URLs are constructor parameters so contract tests can point
//! the client at a local mock server.
//!
//! Downloads are streamed chunk by chunk and check the shutdown signal between
//! chunks, so a signaled process abandons a large transfer within one chunk.

use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::backoff::RetryableError;
use crate::shutdown::{ShutdownRequested, ShutdownSignal};

use super::auth::{AuthError, TokenSource};

/// Listing page size; Drive's documented maximum.
const PAGE_SIZE: u32 = 1000;

/// Fields requested for every listed file.
const LIST_FIELDS: &str =
    "nextPageToken, files(id, name, mimeType, modifiedTime, size, fileExtension, shortcutDetails)";

/// Errors from the Google API clients.
#[derive(Debug, Error)]
pub enum DriveError {
    /// Interrupted by the shutdown signal.
    #[error("shutdown requested")]
    Shutdown(#[from] ShutdownRequested),

    /// Credential or token-exchange failure.
    #[error("google auth failed: {0}")]
    Auth(#[from] AuthError),

    /// The API answered with a non-success status.
    #[error("HTTP {status} from {context}")]
    Status {
        /// Which call failed (endpoint + object id).
        context: String,
        /// The HTTP status code.
        status: u16,
        /// Response body, truncated, for diagnostics.
        body: String,
    },

    /// Network-level failure (DNS, connect, reset, timeout).
    #[error("network error calling {context}: {source}")]
    Network {
        /// Which call failed.
        context: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The response body did not match the expected shape.
    #[error("unexpected response from {context}: {source}")]
    Decode {
        /// Which call failed.
        context: String,
        /// The underlying decode error.
        #[source]
        source: reqwest::Error,
    },

    /// A base URL or request path could not be constructed.
    #[error("invalid request URL for {context}")]
    InvalidUrl {
        /// Which call failed.
        context: String,
    },
}

impl DriveError {
    fn status(context: impl Into<String>, status: u16, body: String) -> Self {
        const BODY_CAP: usize = 512;
        let mut body = body;
        body.truncate(BODY_CAP);
        Self::Status {
            context: context.into(),
            status,
            body,
        }
    }

    fn network(context: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            context: context.into(),
            source,
        }
    }

    /// Returns whether this failure was the shutdown signal.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown(_))
    }
}

impl RetryableError for DriveError {
    fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// One page of a Drive listing. Entries stay as raw JSON objects so the
/// provider can keep the full attribute bag on each descriptor.
#[derive(Debug, Deserialize)]
pub struct FileListPage {
    /// Raw file entries.
    #[serde(default)]
    pub files: Vec<Value>,
    /// Continuation token; absent on the last page.
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
}

/// Shared client for Drive v3, Docs v1, Sheets v4, and Slides v1.
#[derive(Debug)]
pub struct DriveClient {
    http: reqwest::Client,
    token: TokenSource,
    drive_base: String,
    docs_base: String,
    sheets_base: String,
    slides_base: String,
}

impl DriveClient {
    /// Creates a client against the public Google endpoints.
    #[must_use]
    pub fn new(http: reqwest::Client, token: TokenSource) -> Self {
        Self::with_bases(
            http,
            token,
            "https://www.googleapis.com/drive/v3",
            "https://docs.googleapis.com/v1",
            "https://sheets.googleapis.com/v4",
            "https://slides.googleapis.com/v1",
        )
    }

    /// Creates a client against explicit base URLs (mock servers in tests).
    #[must_use]
    pub fn with_bases(
        http: reqwest::Client,
        token: TokenSource,
        drive_base: impl Into<String>,
        docs_base: impl Into<String>,
        sheets_base: impl Into<String>,
        slides_base: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token,
            drive_base: trim_base(drive_base.into()),
            docs_base: trim_base(docs_base.into()),
            sheets_base: trim_base(sheets_base.into()),
            slides_base: trim_base(slides_base.into()),
        }
    }

    /// Fetches one listing page for `query`.
    ///
    /// # Errors
    ///
    /// Surfaces auth, network, status, and decode failures; callers wrap this
    /// in the backoff executor.
    pub async fn list_files_page(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<FileListPage, DriveError> {
        let context = "drive.files.list";
        let mut url = parse_url(format!("{}/files", self.drive_base), context)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", query);
            pairs.append_pair("fields", LIST_FIELDS);
            pairs.append_pair("pageSize", &PAGE_SIZE.to_string());
            if let Some(token) = page_token {
                pairs.append_pair("pageToken", token);
            }
        }

        let value = self.get_json(url, context).await?;
        let files = value
            .get("files")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let next_page_token = value
            .get("nextPageToken")
            .and_then(Value::as_str)
            .map(String::from);
        Ok(FileListPage {
            files,
            next_page_token,
        })
    }

    /// Downloads the raw bytes of a binary file.
    ///
    /// # Errors
    ///
    /// Fails on HTTP/network errors or `ShutdownRequested` mid-transfer.
    pub async fn download_media(
        &self,
        file_id: &str,
        stop: &ShutdownSignal,
    ) -> Result<Vec<u8>, DriveError> {
        let context = format!("drive.files.get media {file_id}");
        let mut url = parse_url(format!("{}/files/{file_id}", self.drive_base), &context)?;
        url.query_pairs_mut().append_pair("alt", "media");
        self.get_bytes(url, &context, stop).await
    }

    /// Exports a hosted document to `mime_type` and returns the bytes.
    ///
    /// # Errors
    ///
    /// Same failure surface as [`DriveClient::download_media`].
    pub async fn download_export(
        &self,
        file_id: &str,
        mime_type: &str,
        stop: &ShutdownSignal,
    ) -> Result<Vec<u8>, DriveError> {
        let context = format!("drive.files.export {file_id}");
        let mut url = parse_url(
            format!("{}/files/{file_id}/export", self.drive_base),
            &context,
        )?;
        url.query_pairs_mut().append_pair("mimeType", mime_type);
        self.get_bytes(url, &context, stop).await
    }

    /// Fetches a Google Doc's structured body.
    ///
    /// # Errors
    ///
    /// Surfaces auth, network, status, and decode failures.
    pub async fn get_document(&self, document_id: &str) -> Result<Value, DriveError> {
        let context = format!("docs.documents.get {document_id}");
        let url = parse_url(format!("{}/documents/{document_id}", self.docs_base), &context)?;
        self.get_json(url, &context).await
    }

    /// Fetches spreadsheet metadata (sheet titles).
    ///
    /// # Errors
    ///
    /// Surfaces auth, network, status, and decode failures.
    pub async fn get_spreadsheet(&self, spreadsheet_id: &str) -> Result<Value, DriveError> {
        let context = format!("sheets.spreadsheets.get {spreadsheet_id}");
        let url = parse_url(
            format!("{}/spreadsheets/{spreadsheet_id}", self.sheets_base),
            &context,
        )?;
        self.get_json(url, &context).await
    }

    /// Fetches cell values for one A1 range.
    ///
    /// # Errors
    ///
    /// Surfaces auth, network, status, and decode failures.
    pub async fn get_sheet_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Value, DriveError> {
        let context = format!("sheets.spreadsheets.values.get {spreadsheet_id}");
        let mut url = parse_url(
            format!("{}/spreadsheets/{spreadsheet_id}/values", self.sheets_base),
            &context,
        )?;
        // The range goes in the path and needs percent-encoding (quotes,
        // spaces, '!').
        url.path_segments_mut()
            .map_err(|()| DriveError::InvalidUrl {
                context: context.clone(),
            })?
            .push(range);
        self.get_json(url, &context).await
    }

    /// Fetches a presentation's slides.
    ///
    /// # Errors
    ///
    /// Surfaces auth, network, status, and decode failures.
    pub async fn get_presentation(&self, presentation_id: &str) -> Result<Value, DriveError> {
        let context = format!("slides.presentations.get {presentation_id}");
        let url = parse_url(
            format!("{}/presentations/{presentation_id}", self.slides_base),
            &context,
        )?;
        self.get_json(url, &context).await
    }

    async fn get_json(&self, url: Url, context: &str) -> Result<Value, DriveError> {
        let token = self.token.token().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| DriveError::network(context, source))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::status(context, status.as_u16(), body));
        }

        response.json().await.map_err(|source| DriveError::Decode {
            context: context.to_string(),
            source,
        })
    }

    async fn get_bytes(
        &self,
        url: Url,
        context: &str,
        stop: &ShutdownSignal,
    ) -> Result<Vec<u8>, DriveError> {
        stop.check()?;

        let token = self.token.token().await?;
        let mut response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| DriveError::network(context, source))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::status(context, status.as_u16(), body));
        }

        let mut bytes = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|source| DriveError::network(context, source))?
        {
            stop.check()?;
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }
}

fn trim_base(base: String) -> String {
    base.trim_end_matches('/').to_string()
}

fn parse_url(raw: String, context: &str) -> Result<Url, DriveError> {
    Url::parse(&raw).map_err(|_| DriveError::InvalidUrl {
        context: context.to_string(),
    })
}
