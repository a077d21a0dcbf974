//! Waiting for Compute long-running operations
//!
//! `PENDING` and `RUNNING` are polled again after an exponential backoff.
//! `DONE` without an error is success. `DONE` with an error, or any status
//! this controller does not know, fails the operation. Transient lookup
//! failures are retried on the same schedule. The caller's cancellation
//! token aborts the wait at once.

use super::compute::{BackendServiceRef, ComputeClient};
use super::types::{Operation, OperationStatus};
use super::ComputeError;
use crate::constants::{
    DEFAULT_OPERATION_TIMEOUT_SECS, OPERATION_POLL_INITIAL_MS, OPERATION_POLL_MAX_INTERVAL_MS,
    OPERATION_POLL_MULTIPLIER, OPERATION_POLL_RANDOMIZATION,
};
use crate::controller::backoff::ExponentialBackoff;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Operation polling schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSettings {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub randomization: f64,
    pub max_interval: Duration,
    /// Overall ceiling on the wait
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(OPERATION_POLL_INITIAL_MS),
            multiplier: OPERATION_POLL_MULTIPLIER,
            randomization: OPERATION_POLL_RANDOMIZATION,
            max_interval: Duration::from_millis(OPERATION_POLL_MAX_INTERVAL_MS),
            timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
        }
    }
}

impl PollSettings {
    /// Default schedule with a different ceiling
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            self.initial_interval,
            self.multiplier,
            self.randomization,
            self.max_interval,
            self.timeout,
        )
    }
}

enum Outcome {
    Done,
    Pending,
}

fn evaluate(operation: &Operation) -> Result<Outcome, ComputeError> {
    match &operation.status {
        OperationStatus::Pending | OperationStatus::Running => Ok(Outcome::Pending),
        OperationStatus::Done => match &operation.error {
            Some(error) => Err(ComputeError::OperationFailed {
                operation: operation.name.clone(),
                message: error.to_string(),
            }),
            None => Ok(Outcome::Done),
        },
        OperationStatus::Other(status) => Err(ComputeError::OperationFailed {
            operation: operation.name.clone(),
            message: format!("unexpected operation status {status:?}"),
        }),
    }
}

fn is_transient(error: &ComputeError) -> bool {
    match error {
        ComputeError::Http(_) => true,
        ComputeError::Api { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

/// Poll `operation`, started against `target`, until it completes
///
/// # Errors
/// - [`ComputeError::OperationFailed`] when the operation reports an error
/// - [`ComputeError::Timeout`] when the ceiling is reached
/// - [`ComputeError::Cancelled`] when `cancel` fires
/// - non-transient lookup errors
pub async fn wait_for_operation(
    client: &ComputeClient,
    target: &BackendServiceRef,
    operation: Operation,
    settings: &PollSettings,
    cancel: &CancellationToken,
) -> Result<Operation, ComputeError> {
    let start = Instant::now();
    let mut backoff = settings.backoff();
    let name = operation.name.clone();
    let mut current = operation;

    loop {
        if matches!(evaluate(&current)?, Outcome::Done) {
            debug!(operation = %name, elapsed_ms = start.elapsed().as_millis(), "Operation done");
            return Ok(current);
        }

        let Some(wait) = backoff.next_backoff(start.elapsed()) else {
            return Err(ComputeError::Timeout {
                operation: name,
                seconds: settings.timeout.as_secs(),
            });
        };

        tokio::select! {
            () = cancel.cancelled() => {
                return Err(ComputeError::Cancelled { operation: name });
            }
            () = tokio::time::sleep(wait) => {}
        }

        match client.get_operation(target, &name).await {
            Ok(next) => current = next,
            Err(e) if is_transient(&e) => {
                warn!(operation = %name, error = %e, "Operation lookup failed, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcp::types::{OperationError, OperationErrorItem};

    fn op(status: OperationStatus, error: Option<OperationError>) -> Operation {
        Operation {
            name: "op-1".to_string(),
            status,
            error,
            ..Default::default()
        }
    }

    #[test]
    fn test_evaluate_statuses() {
        assert!(matches!(evaluate(&op(OperationStatus::Pending, None)), Ok(Outcome::Pending)));
        assert!(matches!(evaluate(&op(OperationStatus::Running, None)), Ok(Outcome::Pending)));
        assert!(matches!(evaluate(&op(OperationStatus::Done, None)), Ok(Outcome::Done)));

        let failed = op(
            OperationStatus::Done,
            Some(OperationError {
                errors: vec![OperationErrorItem {
                    code: "RESOURCE_NOT_READY".to_string(),
                    message: "not ready".to_string(),
                }],
            }),
        );
        match evaluate(&failed) {
            Err(ComputeError::OperationFailed { message, .. }) => {
                assert_eq!(message, "RESOURCE_NOT_READY: not ready");
            }
            _ => panic!("expected operation failure"),
        }

        assert!(matches!(
            evaluate(&op(OperationStatus::Other("ABORTED".to_string()), None)),
            Err(ComputeError::OperationFailed { .. })
        ));
    }

    #[test]
    fn test_default_poll_settings() {
        let settings = PollSettings::default();
        assert_eq!(settings.initial_interval, Duration::from_millis(500));
        assert_eq!(settings.timeout, Duration::from_secs(240));
        assert_eq!(
            PollSettings::with_timeout(Duration::from_secs(5)).timeout,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&ComputeError::Api {
            status: 503,
            message: String::new()
        }));
        assert!(!is_transient(&ComputeError::Api {
            status: 403,
            message: String::new()
        }));
        assert!(!is_transient(&ComputeError::NotFound {
            resource: String::new()
        }));
    }
}
