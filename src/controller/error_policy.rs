//! Requeue policy for failed reconciliations
//!
//! Conflicts writing the Service back are retried almost immediately, since
//! the watch already holds a newer version. Everything else backs off per
//! Service along a Fibonacci sequence that resets after a success.

use super::reconciler::{service_key, Reconciler, ReconcilerError};
use crate::constants::CONFLICT_REQUEUE_SECS;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

pub fn error_policy(service: Arc<Service>, err: &ReconcilerError, ctx: Arc<Reconciler>) -> Action {
    let key = service_key(&service);
    if err.is_conflict() {
        warn!(service = %key, "Service changed during reconciliation, retrying");
        return Action::requeue(Duration::from_secs(CONFLICT_REQUEUE_SECS));
    }

    ctx.metrics.increment_reconciliation_errors();
    let backoff = ctx.next_error_backoff(&key);
    error!(
        service = %key,
        error = %err,
        retry_in_secs = backoff.as_secs(),
        "Reconciliation failed"
    );
    Action::requeue(backoff)
}
