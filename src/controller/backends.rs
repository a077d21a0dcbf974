//! # Backend Service Mutation
//!
//! Applies a [`BackendPlan`] to Compute backend services, one
//! `(port, backend service)` pair at a time:
//!
//! 1. Read the backend service losing groups. A missing backend service is
//!    treated as one without backends. When the groups move to a different
//!    backend service, read that one as well.
//! 2. Drop the removed groups, keeping the order of the remaining entries.
//!    On a move, or while tearing down, push the shrunk backend service
//!    before touching the other one.
//! 3. Update matching entries in place and append new ones.
//! 4. Patch with `If-Match` and wait for the operation.
//!
//! The first failure aborts the batch. Pairs already applied stay applied;
//! the next reconciliation recomputes the plan from fresh state.

use crate::autoneg::backend::copy_balancing;
use crate::autoneg::{reconcile_status, AutonegStatus, Backends};
use crate::gcp::compute::{BackendServiceRef, ComputeClient};
use crate::gcp::operation::{wait_for_operation, PollSettings};
use crate::gcp::types::{Backend, BackendService};
use crate::gcp::ComputeError;
use crate::observability::Metrics;
use async_trait::async_trait;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

/// Applies the difference between two reconciled states to the load balancer
#[async_trait]
pub trait BackendReconciler: Send + Sync {
    /// Move the load balancer from `actual` to `intended`
    ///
    /// # Errors
    /// Returns the first Compute error encountered.
    async fn reconcile_backends(
        &self,
        actual: &AutonegStatus,
        intended: &AutonegStatus,
        deleting: bool,
        cancel: &CancellationToken,
    ) -> Result<(), ComputeError>;
}

/// [`BackendReconciler`] backed by the Compute API
#[derive(Debug)]
pub struct BackendController {
    client: ComputeClient,
    poll: PollSettings,
    metrics: Metrics,
}

impl BackendController {
    #[must_use]
    pub fn new(client: ComputeClient, poll: PollSettings, metrics: Metrics) -> Self {
        Self {
            client,
            poll,
            metrics,
        }
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        self.client.project_id()
    }

    /// Read a backend service; a missing one reads as empty with no `ETag`
    async fn fetch(&self, target: &BackendServiceRef) -> Result<BackendService, ComputeError> {
        match self.client.get_backend_service(target).await {
            Ok(service) => {
                self.metrics.record_backend_service_operation("get", "success");
                Ok(service)
            }
            Err(e) if e.is_not_found() => {
                self.metrics.record_backend_service_operation("get", "not_found");
                debug!(backend_service = %target, "Backend service not found, treating as empty");
                Ok(BackendService {
                    name: target.name.clone(),
                    ..Default::default()
                })
            }
            Err(e) => {
                self.metrics.record_backend_service_operation("get", e.kind());
                Err(e)
            }
        }
    }

    /// Patch the backend list of `service` and wait for the operation
    async fn push(
        &self,
        target: &BackendServiceRef,
        service: &BackendService,
        deleting: bool,
        cancel: &CancellationToken,
    ) -> Result<(), ComputeError> {
        let operation = match self
            .client
            .patch_backends(target, &service.backends, service.etag.as_deref(), deleting)
            .await
        {
            Ok(operation) => {
                self.metrics.record_backend_service_operation("patch", "success");
                operation
            }
            Err(e) => {
                self.metrics.record_backend_service_operation("patch", e.kind());
                return Err(e);
            }
        };

        let started = Instant::now();
        let result = wait_for_operation(&self.client, target, operation, &self.poll, cancel).await;
        self.metrics
            .observe_operation_poll_duration(started.elapsed().as_secs_f64());
        match result {
            Ok(_) => {
                self.metrics.record_backend_service_operation("poll", "success");
                info!(
                    backend_service = %target,
                    backends = service.backends.len(),
                    "Updated backend service"
                );
                Ok(())
            }
            Err(e) => {
                self.metrics.record_backend_service_operation("poll", e.kind());
                Err(e)
            }
        }
    }

    /// Apply one remove/upsert pair
    ///
    /// # Errors
    /// Returns the first Compute error encountered.
    pub async fn apply(
        &self,
        remove: &Backends,
        upsert: &Backends,
        sync_capacity_scaler: bool,
        deleting: bool,
        cancel: &CancellationToken,
    ) -> Result<(), ComputeError> {
        let remove_ref = BackendServiceRef::new(&remove.name, remove.region.as_deref());
        let upsert_ref = BackendServiceRef::new(&upsert.name, upsert.region.as_deref());
        let moving = !remove.same_target(upsert);

        let mut old_service = self.fetch(&remove_ref).await?;
        let removed = remove_groups(&mut old_service.backends, &remove.backends);
        let mut old_pending = removed > 0;

        if old_pending && (moving || deleting) {
            self.push(&remove_ref, &old_service, deleting, cancel).await?;
            old_pending = false;
            if !moving && !upsert.backends.is_empty() {
                old_service = self.fetch(&remove_ref).await?;
            }
        }

        let (mut target, target_ref) = if moving {
            (self.fetch(&upsert_ref).await?, &upsert_ref)
        } else {
            (old_service, &remove_ref)
        };

        upsert_groups(&mut target.backends, &upsert.backends, sync_capacity_scaler);

        if !upsert.backends.is_empty() || old_pending {
            self.push(target_ref, &target, deleting, cancel).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BackendReconciler for BackendController {
    async fn reconcile_backends(
        &self,
        actual: &AutonegStatus,
        intended: &AutonegStatus,
        deleting: bool,
        cancel: &CancellationToken,
    ) -> Result<(), ComputeError> {
        let plan = reconcile_status(self.client.project_id(), actual, intended);
        let sync_capacity_scaler = intended.sync_capacity_scaler();

        for (port, key, remove, upsert) in plan.pairs() {
            if remove.backends.is_empty() && upsert.backends.is_empty() {
                continue;
            }
            let span = info_span!(
                "autoneg.backend_service",
                port = port,
                backend_service.key = key,
                removes = remove.backends.len(),
                upserts = upsert.backends.len(),
                deleting
            );
            self.apply(remove, upsert, sync_capacity_scaler, deleting, cancel)
                .instrument(span)
                .await?;
        }
        Ok(())
    }
}

/// Drop entries whose group is listed in `remove`, keeping order
///
/// Returns how many entries were dropped.
pub fn remove_groups(backends: &mut Vec<Backend>, remove: &[Backend]) -> usize {
    let before = backends.len();
    backends.retain(|b| !remove.iter().any(|r| r.group == b.group));
    before - backends.len()
}

/// Update entries with a matching group in place and append the rest
///
/// An existing entry keeps its capacity scaler unless
/// `sync_capacity_scaler` is set. The kept value is always sent explicitly,
/// so an unset scaler is written as zero rather than left to the API default.
pub fn upsert_groups(backends: &mut Vec<Backend>, upserts: &[Backend], sync_capacity_scaler: bool) {
    for upsert in upserts {
        if let Some(existing) = backends.iter_mut().find(|b| b.group == upsert.group) {
            copy_balancing(existing, upsert);
            existing.capacity_scaler = if sync_capacity_scaler {
                upsert.capacity_scaler
            } else {
                Some(existing.capacity_scaler.unwrap_or(0.0))
            };
        } else {
            backends.push(upsert.clone());
        }
    }
}
