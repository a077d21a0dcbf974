//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Annotation written by the GKE NEG controller describing exposed ports
pub const NEG_ANNOTATION: &str = "cloud.google.com/neg";

/// Annotation written by the GKE NEG controller with NEG names and zones
pub const NEG_STATUS_ANNOTATION: &str = "cloud.google.com/neg-status";

/// Desired backend configuration
pub const AUTONEG_ANNOTATION: &str = "controller.autoneg.dev/neg";

/// Last reconciled state
pub const AUTONEG_STATUS_ANNOTATION: &str = "controller.autoneg.dev/neg-status";

/// Opt-in synchronisation of operator-controlled fields
pub const AUTONEG_SYNC_ANNOTATION: &str = "controller.autoneg.dev/sync";

/// Deprecated single-backend desired configuration
pub const OLD_AUTONEG_ANNOTATION: &str = "anthos.cft.dev/autoneg";

/// Deprecated single-backend reconciled state
pub const OLD_AUTONEG_STATUS_ANNOTATION: &str = "anthos.cft.dev/autoneg-status";

/// Finalizer added to every managed Service
pub const AUTONEG_FINALIZER: &str = "controller.autoneg.dev/neg";

/// Finalizer added by earlier controller versions
pub const OLD_AUTONEG_FINALIZER: &str = "anthos.cft.dev/autoneg";

/// Name used for events and server-side field management
pub const CONTROLLER_NAME: &str = "autoneg-controller";

/// Platform limit for backend service and NEG names
pub const MAX_NAME_LENGTH: usize = 63;

/// Number of hex characters of the SHA-256 digest used by the `{hash}` token
pub const NAME_HASH_LENGTH: usize = 8;

/// Default template for generated backend service names
pub const DEFAULT_SERVICE_NAME_TEMPLATE: &str = "{namespace}-{name}-{port}-{hash}";

/// Compute Engine REST endpoint
pub const COMPUTE_ENDPOINT: &str = "https://compute.googleapis.com/compute/v1";

/// Prefix of backend group URLs as stored on backend services
pub const GROUP_URL_PREFIX: &str = "https://www.googleapis.com/compute/v1";

/// Metadata server endpoint for workload identity access tokens
pub const METADATA_TOKEN_URI: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Metadata server endpoint for the hosting project
pub const METADATA_PROJECT_ID_URI: &str =
    "http://metadata.google.internal/computeMetadata/v1/project/project-id";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default requeue interval for reconciliation errors (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Requeue delay after a Service update conflict (seconds)
pub const CONFLICT_REQUEUE_SECS: u64 = 1;

/// Default periodic reconcile interval when always-reconcile is enabled (seconds)
pub const DEFAULT_RECONCILE_PERIOD_SECS: u64 = 600;

/// Ceiling on the time spent polling one Compute operation (seconds)
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 240;

/// Per-request transport timeout for Compute API calls (seconds)
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Operation polling backoff: first interval (milliseconds)
pub const OPERATION_POLL_INITIAL_MS: u64 = 500;

/// Operation polling backoff: longest single interval (milliseconds)
pub const OPERATION_POLL_MAX_INTERVAL_MS: u64 = 60_000;

/// Operation polling backoff: growth factor
pub const OPERATION_POLL_MULTIPLIER: f64 = 1.5;

/// Operation polling backoff: jitter as a fraction of the interval
pub const OPERATION_POLL_RANDOMIZATION: f64 = 0.5;

/// Error backoff bounds (minutes)
pub const ERROR_BACKOFF_MIN_MINUTES: u64 = 1;
pub const ERROR_BACKOFF_MAX_MINUTES: u64 = 10;
