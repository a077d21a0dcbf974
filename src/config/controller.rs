//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::autoneg::{DecoderConfig, NameTemplate};
use crate::gcp::PollSettings;
use crate::observability::logging::LogFormat;
use anyhow::{bail, Context, Result};
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Project hosting the backend services; discovered from the metadata
    /// server when unset
    pub project_id: Option<String>,
    /// Template for backend service names not given in the annotation
    pub service_name_template: String,
    /// Honour names given in the annotation
    pub enable_custom_service_names: bool,
    /// Process-wide default rate when a backend sets no balancing fields
    pub max_rate_per_endpoint: f64,
    /// Process-wide default connections when a backend sets no balancing fields
    pub max_connections_per_endpoint: i64,
    /// A Service left with only a status annotation is deregistered
    pub deregister_negs_on_annotation_removal: bool,
    /// Resolve NEG zones from `ServiceNetworkEndpointGroup` resources
    pub use_svcneg: bool,
    /// Re-apply backends even when nothing changed
    pub always_reconcile: bool,
    /// Periodic requeue interval when `always_reconcile` is set (seconds)
    pub reconcile_period_secs: u64,
    pub metrics_port: u16,
    /// Compute API root
    pub compute_endpoint: String,
    /// Static bearer token used instead of the metadata server
    pub gcp_access_token: Option<String>,
    /// Ceiling on waiting for one Compute operation (seconds)
    pub operation_timeout_secs: u64,
    /// Per-request transport timeout (seconds)
    pub http_timeout_secs: u64,
    /// Reconciliation error requeue interval (seconds)
    pub reconciliation_error_requeue_secs: u64,
    /// Limits how many Services can be reconciled simultaneously
    pub max_concurrent_reconciliations: u16,
    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            project_id: None,
            service_name_template: DEFAULT_SERVICE_NAME_TEMPLATE.to_string(),
            enable_custom_service_names: true,
            max_rate_per_endpoint: 0.0,
            max_connections_per_endpoint: 0,
            deregister_negs_on_annotation_removal: true,
            use_svcneg: false,
            always_reconcile: false,
            reconcile_period_secs: DEFAULT_RECONCILE_PERIOD_SECS,
            metrics_port: DEFAULT_METRICS_PORT,
            compute_endpoint: COMPUTE_ENDPOINT.to_string(),
            gcp_access_token: None,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            reconciliation_error_requeue_secs: DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
            max_concurrent_reconciliations: 10,
            log_format: LogFormat::Text,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    ///
    /// # Errors
    /// Returns an error for an invalid name template, an unknown log format,
    /// or both default rate and default connections being set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup` instead of the process environment
    ///
    /// # Errors
    /// See [`ControllerConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            project_id: env_var_opt(&lookup, "PROJECT_ID"),
            service_name_template: env_var_or_default_str(
                &lookup,
                "DEFAULT_BACKENDSERVICE_NAME",
                &defaults.service_name_template,
            ),
            enable_custom_service_names: env_var_or_default_bool(
                &lookup,
                "ENABLE_CUSTOM_SERVICE_NAMES",
                defaults.enable_custom_service_names,
            ),
            max_rate_per_endpoint: env_var_or_default(
                &lookup,
                "MAX_RATE_PER_ENDPOINT",
                defaults.max_rate_per_endpoint,
            ),
            max_connections_per_endpoint: env_var_or_default(
                &lookup,
                "MAX_CONNECTIONS_PER_ENDPOINT",
                defaults.max_connections_per_endpoint,
            ),
            deregister_negs_on_annotation_removal: env_var_or_default_bool(
                &lookup,
                "DEREGISTER_NEGS_ON_ANNOTATION_REMOVAL",
                defaults.deregister_negs_on_annotation_removal,
            ),
            use_svcneg: env_var_or_default_bool(&lookup, "USE_SVCNEG", defaults.use_svcneg),
            always_reconcile: env_var_or_default_bool(
                &lookup,
                "ALWAYS_RECONCILE",
                defaults.always_reconcile,
            ),
            reconcile_period_secs: env_var_or_default(
                &lookup,
                "RECONCILE_PERIOD_SECS",
                defaults.reconcile_period_secs,
            ),
            metrics_port: env_var_or_default(&lookup, "METRICS_PORT", defaults.metrics_port),
            compute_endpoint: env_var_or_default_str(
                &lookup,
                "COMPUTE_ENDPOINT",
                &defaults.compute_endpoint,
            ),
            gcp_access_token: env_var_opt(&lookup, "GCP_ACCESS_TOKEN"),
            operation_timeout_secs: env_var_or_default(
                &lookup,
                "OPERATION_TIMEOUT_SECS",
                defaults.operation_timeout_secs,
            ),
            http_timeout_secs: env_var_or_default(
                &lookup,
                "HTTP_TIMEOUT_SECS",
                defaults.http_timeout_secs,
            ),
            reconciliation_error_requeue_secs: env_var_or_default(
                &lookup,
                "RECONCILIATION_ERROR_REQUEUE_SECS",
                defaults.reconciliation_error_requeue_secs,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                &lookup,
                "MAX_CONCURRENT_RECONCILIATIONS",
                defaults.max_concurrent_reconciliations,
            ),
            log_format: env_var_opt(&lookup, "LOG_FORMAT")
                .map(|v| v.parse::<LogFormat>())
                .transpose()
                .map_err(anyhow::Error::msg)
                .context("invalid LOG_FORMAT")?
                .unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    /// Returns the first constraint violated.
    pub fn validate(&self) -> Result<()> {
        NameTemplate::parse(&self.service_name_template)
            .context("invalid DEFAULT_BACKENDSERVICE_NAME")?;
        if self.max_rate_per_endpoint > 0.0 && self.max_connections_per_endpoint > 0 {
            bail!("MAX_RATE_PER_ENDPOINT and MAX_CONNECTIONS_PER_ENDPOINT are mutually exclusive");
        }
        if self.max_rate_per_endpoint < 0.0 || self.max_connections_per_endpoint < 0 {
            bail!("MAX_RATE_PER_ENDPOINT and MAX_CONNECTIONS_PER_ENDPOINT must not be negative");
        }
        Ok(())
    }

    /// Settings for annotation decoding
    ///
    /// # Errors
    /// Returns an error for an invalid name template.
    pub fn decoder_config(&self) -> Result<DecoderConfig> {
        Ok(DecoderConfig {
            service_name_template: NameTemplate::parse(&self.service_name_template)
                .context("invalid DEFAULT_BACKENDSERVICE_NAME")?,
            allow_service_name: self.enable_custom_service_names,
            default_max_rate_per_endpoint: self.max_rate_per_endpoint,
            default_max_connections_per_endpoint: self.max_connections_per_endpoint,
            deregister_negs_on_annotation_removal: self.deregister_negs_on_annotation_removal,
        })
    }

    /// Operation polling schedule
    #[must_use]
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings::with_timeout(Duration::from_secs(self.operation_timeout_secs))
    }

    /// Get periodic reconcile duration
    #[must_use]
    pub fn reconcile_period(&self) -> Duration {
        Duration::from_secs(self.reconcile_period_secs)
    }

    /// Get reconciliation error requeue duration
    #[must_use]
    pub fn reconciliation_error_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.reconciliation_error_requeue_secs)
    }

    /// Get HTTP request timeout
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> bool {
    lookup(key)
        .map(|v| {
            let v_lower = v.trim().to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

/// Read a non-empty environment variable
fn env_var_opt(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}
