//! Compute Engine REST client
//!
//! Reads and patches global and regional backend services and looks up the
//! long-running operations a patch returns. Reads keep the `ETag` header so
//! the following patch can be made conditional with `If-Match`.
//!
//! References:
//! - [backendServices](https://cloud.google.com/compute/docs/reference/rest/v1/backendServices)
//! - [regionBackendServices](https://cloud.google.com/compute/docs/reference/rest/v1/regionBackendServices)

use super::auth::TokenSource;
use super::types::{Backend, BackendService, BackendsPatch, GcpErrorResponse, Operation};
use super::ComputeError;
use reqwest::{header, Client, Method, StatusCode};
use std::fmt;
use tracing::{debug, info_span, Instrument};

/// A backend service addressed by name and optional region
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendServiceRef {
    pub name: String,
    /// `None` addresses a global backend service
    pub region: Option<String>,
}

impl BackendServiceRef {
    #[must_use]
    pub fn new(name: impl Into<String>, region: Option<&str>) -> Self {
        Self {
            name: name.into(),
            region: region.filter(|r| !r.is_empty()).map(str::to_string),
        }
    }

    fn path(&self, project: &str) -> String {
        match &self.region {
            Some(region) => format!(
                "projects/{project}/regions/{region}/backendServices/{}",
                self.name
            ),
            None => format!("projects/{project}/global/backendServices/{}", self.name),
        }
    }

    fn operation_path(&self, project: &str, operation: &str) -> String {
        match &self.region {
            Some(region) => format!("projects/{project}/regions/{region}/operations/{operation}"),
            None => format!("projects/{project}/global/operations/{operation}"),
        }
    }
}

impl fmt::Display for BackendServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => write!(f, "{region}/{}", self.name),
            None => write!(f, "global/{}", self.name),
        }
    }
}

/// Compute Engine REST client
pub struct ComputeClient {
    http: Client,
    base_url: String,
    project_id: String,
    tokens: TokenSource,
}

impl fmt::Debug for ComputeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeClient")
            .field("project_id", &self.project_id)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ComputeClient {
    /// `base_url` is the API root, e.g. `https://compute.googleapis.com/compute/v1`
    #[must_use]
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        tokens: TokenSource,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            tokens,
        }
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Fetch a backend service, keeping its `ETag`
    ///
    /// # Errors
    /// [`ComputeError::NotFound`] on 404, otherwise transport or API errors.
    pub async fn get_backend_service(
        &self,
        target: &BackendServiceRef,
    ) -> Result<BackendService, ComputeError> {
        let span = info_span!(
            "gcp.compute.get_backend_service",
            backend_service.name = %target.name,
            backend_service.region = target.region.as_deref().unwrap_or("global"),
            project.id = %self.project_id
        );
        async move {
            let response = self
                .make_request(Method::GET, &target.path(&self.project_id))
                .await?
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(handle_error_response(status, &text, &target.to_string()));
            }
            let etag = response
                .headers()
                .get(header::ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.bytes().await?;
            let mut service: BackendService = serde_json::from_slice(&body)?;
            service.etag = etag;
            debug!(backends = service.backends.len(), "Fetched backend service");
            Ok(service)
        }
        .instrument(span)
        .await
    }

    /// Replace the backend list of a backend service
    ///
    /// An empty list is sent as `[]`, or as `null` when `deleting`. With an
    /// `etag` the patch is conditional on the resource being unchanged.
    ///
    /// # Errors
    /// Transport or API errors; a failed precondition is an ordinary
    /// [`ComputeError::Api`] with status 412.
    pub async fn patch_backends(
        &self,
        target: &BackendServiceRef,
        backends: &[Backend],
        etag: Option<&str>,
        deleting: bool,
    ) -> Result<Operation, ComputeError> {
        let span = info_span!(
            "gcp.compute.patch_backends",
            backend_service.name = %target.name,
            backend_service.region = target.region.as_deref().unwrap_or("global"),
            project.id = %self.project_id,
            backends = backends.len()
        );
        async move {
            let patch = BackendsPatch {
                backends: if backends.is_empty() && deleting {
                    None
                } else {
                    Some(backends)
                },
            };
            let mut request = self
                .make_request(Method::PATCH, &target.path(&self.project_id))
                .await?
                .json(&patch);
            if let Some(etag) = etag {
                request = request.header(header::IF_MATCH, etag);
            }
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(handle_error_response(status, &text, &target.to_string()));
            }
            let body = response.bytes().await?;
            let operation: Operation = serde_json::from_slice(&body)?;
            debug!(operation = %operation.name, "Patched backend service");
            Ok(operation)
        }
        .instrument(span)
        .await
    }

    /// Look up an operation started against `target`
    ///
    /// # Errors
    /// Transport or API errors.
    pub async fn get_operation(
        &self,
        target: &BackendServiceRef,
        operation: &str,
    ) -> Result<Operation, ComputeError> {
        let path = target.operation_path(&self.project_id, operation);
        let response = self.make_request(Method::GET, &path).await?.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(handle_error_response(status, &text, &format!("operation {operation}")));
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Build an authenticated request for `path` under the API root
    async fn make_request(
        &self,
        method: Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, ComputeError> {
        let url = format!("{}/{path}", self.base_url);
        let token = self.tokens.token().await?;
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, "application/json"))
    }
}

/// Map a non-2xx response to a [`ComputeError`]
fn handle_error_response(status: StatusCode, error_text: &str, resource: &str) -> ComputeError {
    if status == StatusCode::NOT_FOUND {
        return ComputeError::NotFound {
            resource: resource.to_string(),
        };
    }
    let message = match serde_json::from_str::<GcpErrorResponse>(error_text) {
        Ok(response) if !response.error.status.is_empty() => {
            format!("{} ({})", response.error.message, response.error.status)
        }
        Ok(response) => response.error.message,
        Err(_) => error_text.to_string(),
    };
    ComputeError::Api {
        status: status.as_u16(),
        message,
    }
}
