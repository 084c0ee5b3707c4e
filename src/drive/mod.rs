//! Google API access: service-account auth and the REST clients for
//! Drive v3, Docs v1, Sheets v4, and Slides v1.

mod api;
mod auth;

pub use api::{DriveClient, DriveError, FileListPage};
pub use auth::{AuthError, TokenSource};

/// MIME type of Drive folders.
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// MIME type of Drive shortcuts (symlink-like entries, never followed).
pub const SHORTCUT_MIME: &str = "application/vnd.google-apps.shortcut";
