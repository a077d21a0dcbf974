//! # Google Cloud
//!
//! Native REST access to the Compute Engine backend service API.
//!
//! - `types`: request and response payloads
//! - `auth`: bearer tokens and project discovery via the metadata server
//! - `compute`: backend service get/patch and operation lookup
//! - `operation`: polling long-running operations to completion

pub mod auth;
pub mod compute;
pub mod operation;
pub mod types;

pub use auth::TokenSource;
pub use compute::{BackendServiceRef, ComputeClient};
pub use operation::{wait_for_operation, PollSettings};

use thiserror::Error;

/// Errors from the Compute API
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Compute API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode Compute API response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to obtain access token: {0}")]
    Auth(String),

    #[error("operation {operation} failed: {message}")]
    OperationFailed { operation: String, message: String },

    #[error("operation {operation} did not complete within {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("operation {operation} polling cancelled")]
    Cancelled { operation: String },
}

impl ComputeError {
    /// True for HTTP 404 responses
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Short label for metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Api { status: 412, .. } => "precondition_failed",
            Self::Api { .. } => "api",
            Self::Http(_) => "http",
            Self::Decode(_) => "decode",
            Self::Auth(_) => "auth",
            Self::OperationFailed { .. } => "operation_failed",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}
