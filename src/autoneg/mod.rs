//! # Autoneg Core
//!
//! Annotation decoding, naming and the backend diff. Nothing in this module
//! performs I/O; the controller feeds it annotations and applies its output.
//!
//! - `naming`: backend service name generation
//! - `types`: annotation data model
//! - `validation`: cross-field checks on desired configuration
//! - `decode`: annotations to [`types::Statuses`]
//! - `backend`: balancing mode and capacity for one backend entry
//! - `diff`: actual vs intended into remove and upsert bundles

pub mod backend;
pub mod decode;
pub mod diff;
pub mod naming;
pub mod types;
pub mod validation;

pub use decode::{decode, DecoderConfig};
pub use diff::{reconcile_status, BackendPlan};
pub use naming::{generate_name, is_valid_template, NameTemplate};
pub use types::*;

use thiserror::Error;

/// Errors from decoding or validating a Service's annotations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("annotation {annotation} is malformed: {source}")]
    Malformed {
        annotation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error(
        "legacy autoneg annotation requires exactly one exposed port in cloud.google.com/neg, found {count}"
    )]
    LegacyPortCount { count: usize },

    #[error("backend service {name:?} (port {port}) sets both max_rate_per_endpoint and max_connections_per_endpoint")]
    RateAndConnections { port: String, name: String },

    #[error("backend service {name:?} (port {port}): {field} must be between 0 and 100, got {value}")]
    PercentageOutOfRange {
        port: String,
        name: String,
        field: &'static str,
        value: i32,
    },

    #[error("backend service {name:?} (port {port}): custom metric #{index} ({metric:?}) must be dry_run, only 3 active custom metrics are allowed")]
    TooManyCustomMetrics {
        port: String,
        name: String,
        index: usize,
        metric: String,
    },

    #[error("backend service {name:?} (port {port}): custom metric {metric:?} max_utilization must be between 0 and 1, got {value}")]
    MaxUtilizationOutOfRange {
        port: String,
        name: String,
        metric: String,
        value: f64,
    },

    #[error("backend service {name:?} is listed more than once for port {port}")]
    DuplicateBackendService { port: String, name: String },
}
