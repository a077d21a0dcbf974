//! Compute Engine REST API payloads
//!
//! Only the fields the controller reads or writes are typed. Everything else
//! a backend entry carries is kept in `extra` so a read-modify-write never
//! drops settings made by other tools.
//!
//! API Reference: <https://cloud.google.com/compute/docs/reference/rest/v1/backendServices>

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Backend balancing mode
///
/// Modes this controller never sets are carried through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BalancingMode {
    Rate,
    Connection,
    CustomMetrics,
    Other(String),
}

impl BalancingMode {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Rate => "RATE",
            Self::Connection => "CONNECTION",
            Self::CustomMetrics => "CUSTOM_METRICS",
            Self::Other(mode) => mode,
        }
    }
}

impl From<String> for BalancingMode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "RATE" => Self::Rate,
            "CONNECTION" => Self::Connection,
            "CUSTOM_METRICS" => Self::CustomMetrics,
            _ => Self::Other(value),
        }
    }
}

impl From<BalancingMode> for String {
    fn from(value: BalancingMode) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for BalancingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Custom metric attached to a backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendCustomMetric {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_utilization: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One backend of a backend service
///
/// Every `Some` field is transmitted, so `Some(0.0)` clears a value on the
/// API side while `None` leaves it out of the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    /// Fully qualified URL of the network endpoint group
    #[serde(default)]
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balancing_mode: Option<BalancingMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rate_per_endpoint: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections_per_endpoint: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_scaler: Option<f64>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub custom_metrics: Vec<BackendCustomMetric>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Backend {
    /// A backend carrying only its group, as used in remove bundles
    #[must_use]
    pub fn for_group(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            ..Default::default()
        }
    }
}

/// Backend service resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendService {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub backends: Vec<Backend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// `ETag` response header of the read, sent back as `If-Match`
    #[serde(skip)]
    pub etag: Option<String>,
}

/// PATCH body for a backend service; only the backend list is sent
#[derive(Debug, Serialize)]
pub(crate) struct BackendsPatch<'a> {
    /// `None` is sent as an explicit `null`
    pub backends: Option<&'a [Backend]>,
}

/// Long-running operation status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
    Other(String),
}

impl From<String> for OperationStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PENDING" => Self::Pending,
            "RUNNING" => Self::Running,
            "DONE" => Self::Done,
            _ => Self::Other(value),
        }
    }
}

impl From<OperationStatus> for String {
    fn from(value: OperationStatus) -> Self {
        match value {
            OperationStatus::Pending => "PENDING".to_string(),
            OperationStatus::Running => "RUNNING".to_string(),
            OperationStatus::Done => "DONE".to_string(),
            OperationStatus::Other(status) => status,
        }
    }
}

impl Default for OperationStatus {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationErrorItem {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    #[serde(default, deserialize_with = "null_as_default")]
    pub errors: Vec<OperationErrorItem>,
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return f.write_str("operation reported an error");
        }
        let messages: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect();
        f.write_str(&messages.join("; "))
    }
}

/// Compute long-running operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
    /// Region URL for regional operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
}

/// GCP error envelope
///
/// API Reference: <https://cloud.google.com/apis/design/errors>
#[derive(Debug, Deserialize)]
pub(crate) struct GcpErrorResponse {
    pub error: GcpError,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GcpError {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

/// OAuth2 access token from the metadata server
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
}
