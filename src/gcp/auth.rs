//! Access tokens for the Compute API
//!
//! Workload Identity tokens come from the GKE metadata server and are cached
//! until shortly before they expire. A static token (`GCP_ACCESS_TOKEN`)
//! replaces the metadata server for local runs and tests.
//!
//! API Reference: <https://cloud.google.com/compute/docs/metadata/querying-metadata>

use super::types::TokenResponse;
use super::ComputeError;
use crate::constants::{METADATA_PROJECT_ID_URI, METADATA_TOKEN_URI};
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Tokens are refreshed this long before their advertised expiry
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug)]
enum Source {
    Static(String),
    Metadata { token_uri: String },
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Source of bearer tokens
pub struct TokenSource {
    source: Source,
    http: Client,
    cached: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.source {
            Source::Static(_) => "static",
            Source::Metadata { .. } => "metadata",
        };
        f.debug_struct("TokenSource")
            .field("source", &kind)
            .finish_non_exhaustive()
    }
}

impl TokenSource {
    /// A fixed token, used as-is
    #[must_use]
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            source: Source::Static(token.into()),
            http: Client::new(),
            cached: Mutex::new(None),
        }
    }

    /// Tokens from the GKE metadata server (Workload Identity)
    #[must_use]
    pub fn metadata(http: Client) -> Self {
        Self::metadata_at(http, METADATA_TOKEN_URI)
    }

    /// Tokens from a metadata-compatible endpoint at `token_uri`
    #[must_use]
    pub fn metadata_at(http: Client, token_uri: impl Into<String>) -> Self {
        Self {
            source: Source::Metadata {
                token_uri: token_uri.into(),
            },
            http,
            cached: Mutex::new(None),
        }
    }

    /// Current bearer token, fetching a new one when needed
    ///
    /// # Errors
    /// Returns [`ComputeError::Auth`] when the metadata server cannot be
    /// reached or returns an unusable response.
    pub async fn token(&self) -> Result<String, ComputeError> {
        let token_uri = match &self.source {
            Source::Static(token) => return Ok(token.clone()),
            Source::Metadata { token_uri } => token_uri,
        };

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .http
            .get(token_uri)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| ComputeError::Auth(format!("metadata server not available: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ComputeError::Auth(format!(
                "metadata server returned {status}: {body}"
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ComputeError::Auth(format!("invalid token response: {e}")))?;

        debug!(expires_in = token.expires_in, "Retrieved access token from metadata server");
        let value = token.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }
}

/// Project hosting the cluster, as reported by the metadata server
///
/// # Errors
/// Returns [`ComputeError::Auth`] if the metadata server is unavailable.
pub async fn metadata_project_id(http: &Client) -> Result<String, ComputeError> {
    metadata_project_id_at(http, METADATA_PROJECT_ID_URI).await
}

/// [`metadata_project_id`] against an explicit endpoint
///
/// # Errors
/// Returns [`ComputeError::Auth`] if the endpoint is unavailable or empty.
pub async fn metadata_project_id_at(http: &Client, uri: &str) -> Result<String, ComputeError> {
    let response = http
        .get(uri)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|e| ComputeError::Auth(format!("metadata server not available: {e}")))?;
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(ComputeError::Auth(format!(
            "metadata server returned {status} for project id: {body}"
        )));
    }
    let project = body.trim().to_string();
    if project.is_empty() {
        return Err(ComputeError::Auth("metadata server returned an empty project id".to_string()));
    }
    info!(project.id = %project, "Discovered project from metadata server");
    Ok(project)
}
