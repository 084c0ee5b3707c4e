//! Service-account authentication.
//!
//! Builds an RS256-signed JWT assertion from the service-account key file and
//! exchanges it at the key's token URI for a bearer token. Tokens are cached
//! and refreshed shortly before expiry. Tests use [`TokenSource::fixed`] to
//! bypass the exchange entirely.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// OAuth scope for read-only Drive access.
pub const DRIVE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

/// Assertion lifetime requested from the token endpoint.
const ASSERTION_LIFETIME: Duration = Duration::from_secs(3600);

/// Refresh tokens this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Errors from credential loading or the token exchange.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The service-account file could not be read.
    #[error("failed to read service account file {path}: {source}")]
    Read {
        /// Path to the credentials file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The service-account file is not valid JSON or misses required fields.
    #[error("invalid service account file {path}: {source}")]
    Parse {
        /// Path to the credentials file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The private key could not be used for RS256 signing.
    #[error("invalid service account private key: {0}")]
    Key(#[source] jsonwebtoken::errors::Error),

    /// Signing the assertion failed.
    #[error("failed to sign token assertion: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),

    /// The token endpoint was unreachable.
    #[error("token endpoint request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The token endpoint rejected the assertion.
    #[error("token endpoint returned HTTP {status}: {body}")]
    Status {
        /// HTTP status of the rejection.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    expires_at: SystemTime,
}

/// Where bearer tokens come from.
#[derive(Debug)]
pub enum TokenSource {
    /// Real service-account exchange with caching.
    ServiceAccount(ServiceAccountAuth),
    /// A fixed token, for tests and local mocks.
    Fixed(String),
}

impl TokenSource {
    /// Loads a service-account key file and prepares the signing key.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, parsed, or its key is not a valid
    /// RSA PEM.
    pub fn service_account(path: &Path, http: reqwest::Client) -> Result<Self, AuthError> {
        Ok(Self::ServiceAccount(ServiceAccountAuth::from_file(path, http)?))
    }

    /// A source that always returns `token`.
    #[must_use]
    pub fn fixed(token: impl Into<String>) -> Self {
        Self::Fixed(token.into())
    }

    /// Returns a currently-valid bearer token.
    ///
    /// # Errors
    ///
    /// Propagates token-exchange failures for the service-account source.
    pub async fn token(&self) -> Result<String, AuthError> {
        match self {
            Self::ServiceAccount(auth) => auth.token().await,
            Self::Fixed(token) => Ok(token.clone()),
        }
    }
}

/// Cached service-account token exchange.
pub struct ServiceAccountAuth {
    http: reqwest::Client,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

// Manual Debug: the signing key and cached tokens stay out of logs.
impl std::fmt::Debug for ServiceAccountAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountAuth")
            .field("client_email", &self.key.client_email)
            .field("token_uri", &self.key.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountAuth {
    fn from_file(path: &Path, http: reqwest::Client) -> Result<Self, AuthError> {
        let raw = std::fs::read_to_string(path).map_err(|source| AuthError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let key: ServiceAccountKey =
            serde_json::from_str(&raw).map_err(|source| AuthError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let encoding_key =
            EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(AuthError::Key)?;

        Ok(Self {
            http,
            key,
            encoding_key,
            cached: Mutex::new(None),
        })
    }

    async fn token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;

        if let Some(entry) = cached.as_ref() {
            if SystemTime::now() + EXPIRY_MARGIN < entry.expires_at {
                return Ok(entry.token.clone());
            }
        }

        let fresh = self.exchange().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn exchange(&self) -> Result<CachedToken, AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: DRIVE_READONLY_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME.as_secs(),
        };
        let assertion = jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &self.encoding_key,
        )
        .map_err(AuthError::Sign)?;

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response.json().await?;
        debug!(
            component = "ingest",
            flow = "google_api",
            expires_in = token.expires_in,
            "access_token_refreshed"
        );
        Ok(CachedToken {
            token: token.access_token,
            expires_at: SystemTime::now() + Duration::from_secs(token.expires_in.max(60)),
        })
    }
}
