//! # Reconciler
//!
//! Drives one Service through a reconciliation pass.
//!
//! ## Reconciliation Flow
//!
//! 1. Decode the autoneg annotations. Services without any are ignored.
//! 2. Work out whether the Service is being torn down (deletion requested
//!    and one of our finalizers still present).
//! 3. Build the intended state from the configuration and the observed NEGs.
//!    A teardown intends no NEGs at all.
//! 4. Apply the difference to the load balancer.
//! 5. Persist the new reconciled state and the finalizer, or remove both
//!    once torn down.
//! 6. Publish an event per backend service.

use super::backends::BackendReconciler;
use super::backoff::FibonacciBackoff;
use super::events::{actions, reasons, EventPublisher};
use super::svcneg::{resolve_zones, NegZoneLookup};
use crate::autoneg::{
    decode, AutonegStatus, ConfigError, DecoderConfig, NegStatus, OldAutonegStatus, Statuses,
};
use crate::constants::{
    AUTONEG_FINALIZER, AUTONEG_STATUS_ANNOTATION, ERROR_BACKOFF_MAX_MINUTES,
    ERROR_BACKOFF_MIN_MINUTES, OLD_AUTONEG_FINALIZER, OLD_AUTONEG_STATUS_ANNOTATION,
};
use crate::gcp::ComputeError;
use crate::observability::Metrics;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("invalid autoneg configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("backend service update failed: {0}")]
    Backend(#[from] ComputeError),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to serialize status: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Service is missing {0}")]
    MissingMetadata(&'static str),
}

impl ReconcilerError {
    /// Optimistic-concurrency conflict writing the Service back
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(api_err)) if api_err.code == 409)
    }
}

/// Writes Services back to the API server
#[async_trait]
pub trait ServiceWriter: Send + Sync {
    /// Replace `service`, conditional on its `resourceVersion`
    ///
    /// # Errors
    /// Returns the API error, 409 on a concurrent modification.
    async fn replace(&self, service: &Service) -> Result<Service, kube::Error>;
}

/// [`ServiceWriter`] using the Kubernetes API
#[derive(Clone)]
pub struct KubeServiceWriter {
    client: Client,
}

impl std::fmt::Debug for KubeServiceWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeServiceWriter").finish_non_exhaustive()
    }
}

impl KubeServiceWriter {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceWriter for KubeServiceWriter {
    async fn replace(&self, service: &Service) -> Result<Service, kube::Error> {
        let namespace = service.namespace().unwrap_or_default();
        let api: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&service.name_any(), &PostParams::default(), service)
            .await
    }
}

/// Reconciler context shared by all reconciliations
pub struct Reconciler {
    pub backends: Arc<dyn BackendReconciler>,
    pub services: Arc<dyn ServiceWriter>,
    pub events: Arc<dyn EventPublisher>,
    /// Set when zones come from `ServiceNetworkEndpointGroup` resources
    pub zones: Option<Arc<dyn NegZoneLookup>>,
    pub decoder: DecoderConfig,
    pub always_reconcile: bool,
    pub reconcile_period: Duration,
    /// Error requeue used when no backoff state is available
    pub error_requeue: Duration,
    pub metrics: Metrics,
    /// Cancelled on shutdown; aborts in-flight operation polls
    pub cancel: CancellationToken,
    /// Error backoff per `namespace/name`
    pub backoff_states: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("decoder", &self.decoder)
            .field("always_reconcile", &self.always_reconcile)
            .field("reconcile_period", &self.reconcile_period)
            .field("use_svcneg", &self.zones.is_some())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Action after a successful pass
    #[must_use]
    pub fn success_action(&self) -> Action {
        if self.always_reconcile {
            Action::requeue(self.reconcile_period)
        } else {
            Action::await_change()
        }
    }

    /// Next error backoff for `key`
    pub fn next_error_backoff(&self, key: &str) -> Duration {
        match self.backoff_states.lock() {
            Ok(mut states) => states
                .entry(key.to_string())
                .or_insert_with(|| {
                    FibonacciBackoff::new(ERROR_BACKOFF_MIN_MINUTES, ERROR_BACKOFF_MAX_MINUTES)
                })
                .next_backoff(),
            Err(_) => self.error_requeue,
        }
    }

    /// Drop the error backoff of `namespace/name`
    ///
    /// Called after a successful pass, and for Services that no longer exist.
    pub fn forget_backoff(&self, namespace: Option<&str>, name: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(&object_key(namespace, name));
        }
    }
}

fn object_key(namespace: Option<&str>, name: &str) -> String {
    format!("{}/{}", namespace.unwrap_or_default(), name)
}

/// `namespace/name` of a Service
#[must_use]
pub fn service_key(service: &Service) -> String {
    object_key(service.namespace().as_deref(), &service.name_any())
}

/// Controller entry point
///
/// # Errors
/// Returns the error of the failed step; see [`ReconcilerError`].
pub async fn reconcile(service: Arc<Service>, ctx: Arc<Reconciler>) -> Result<Action, ReconcilerError> {
    let span = info_span!(
        "autoneg.reconcile",
        service.namespace = %service.namespace().unwrap_or_default(),
        service.name = %service.name_any()
    );
    let start = Instant::now();
    ctx.metrics.increment_reconciliations();

    let result = reconcile_service(&service, &ctx).instrument(span).await;

    ctx.metrics
        .observe_reconciliation_duration(start.elapsed().as_secs_f64());
    if result.is_ok() {
        ctx.forget_backoff(service.namespace().as_deref(), &service.name_any());
    }
    result
}

/// One reconciliation pass for `service`
///
/// # Errors
/// Returns the error of the failed step; see [`ReconcilerError`].
pub async fn reconcile_service(service: &Service, ctx: &Reconciler) -> Result<Action, ReconcilerError> {
    let namespace = service
        .namespace()
        .ok_or(ReconcilerError::MissingMetadata("metadata.namespace"))?;
    let name = service.name_any();
    let object_ref = service.object_ref(&());
    let annotations = service.metadata.annotations.clone().unwrap_or_default();

    let statuses = match decode(&namespace, &name, &annotations, &ctx.decoder) {
        Ok(Some(statuses)) => statuses,
        Ok(None) => return Ok(Action::await_change()),
        Err(e) => {
            ctx.metrics.increment_config_errors();
            ctx.events
                .publish(
                    &object_ref,
                    EventType::Warning,
                    reasons::CONFIG_ERROR,
                    actions::RECONCILE,
                    Some(e.to_string()),
                )
                .await;
            return Err(e.into());
        }
    };

    let finalizers = service.finalizers();
    let has_finalizer = finalizers.iter().any(|f| f == AUTONEG_FINALIZER);
    let has_any_finalizer = has_finalizer || finalizers.iter().any(|f| f == OLD_AUTONEG_FINALIZER);
    let deleting = service.metadata.deletion_timestamp.is_some();
    if deleting && !has_any_finalizer {
        debug!("Service is being deleted without our finalizer");
        return Ok(Action::await_change());
    }
    if deleting {
        info!("Deleting service");
    }

    let neg_status = if deleting {
        NegStatus::default()
    } else if let Some(lookup) = &ctx.zones {
        resolve_zones(lookup.as_ref(), &namespace, &statuses.neg_status).await?
    } else {
        statuses.neg_status.clone()
    };
    let intended = intended_status(&statuses, neg_status);

    if !deleting && has_finalizer && !ctx.always_reconcile && statuses.status == intended {
        debug!("Reconciled state matches intended state");
        return Ok(ctx.success_action());
    }

    info!(
        backend_services = intended.config.backend_services.values().map(|s| s.len()).sum::<usize>(),
        zones = intended.neg_status.zones.len(),
        "Applying intended status"
    );

    if let Err(e) = ctx
        .backends
        .reconcile_backends(&statuses.status, &intended, deleting, &ctx.cancel)
        .await
    {
        if !(deleting && e.is_not_found()) {
            ctx.events
                .publish(
                    &object_ref,
                    EventType::Warning,
                    reasons::BACKEND_ERROR,
                    if deleting { actions::DELETE } else { actions::RECONCILE },
                    Some(e.to_string()),
                )
                .await;
            return Err(e.into());
        }
        debug!(error = %e, "Backend service already gone during teardown");
    }

    let updated = if deleting {
        without_status(service)
    } else {
        let old_status = (!statuses.new_config).then(|| OldAutonegStatus {
            config: statuses.old_config.clone(),
            neg_status: intended.neg_status.clone(),
        });
        with_status(service, &intended, old_status.as_ref())?
    };

    if let Err(e) = ctx.services.replace(&updated).await {
        let e = ReconcilerError::from(e);
        if !e.is_conflict() {
            ctx.events
                .publish(
                    &object_ref,
                    EventType::Warning,
                    reasons::BACKEND_ERROR,
                    actions::RECONCILE,
                    Some(e.to_string()),
                )
                .await;
        }
        return Err(e);
    }

    for (reason, note) in backend_events(&namespace, &name, &intended, deleting) {
        let action = if deleting { actions::DELETE } else { actions::RECONCILE };
        ctx.events
            .publish(&object_ref, EventType::Normal, reason, action, Some(note))
            .await;
    }

    Ok(ctx.success_action())
}

/// Intended state: decoded configuration over the given NEGs
#[must_use]
pub fn intended_status(statuses: &Statuses, neg_status: NegStatus) -> AutonegStatus {
    AutonegStatus {
        config: statuses.config.clone(),
        neg_status,
        sync: statuses.sync_config,
    }
}

/// Copy of `service` carrying the finalizer and the reconciled state
///
/// # Errors
/// Returns an error if the status cannot be serialized.
pub fn with_status(
    service: &Service,
    status: &AutonegStatus,
    old_status: Option<&OldAutonegStatus>,
) -> Result<Service, serde_json::Error> {
    let mut updated = service.clone();
    let finalizers = updated.finalizers_mut();
    if !finalizers.iter().any(|f| f == AUTONEG_FINALIZER) {
        info!("Adding finalizer");
        finalizers.push(AUTONEG_FINALIZER.to_string());
    }
    let annotations = updated.annotations_mut();
    annotations.insert(
        AUTONEG_STATUS_ANNOTATION.to_string(),
        serde_json::to_string(status)?,
    );
    if let Some(old_status) = old_status {
        annotations.insert(
            OLD_AUTONEG_STATUS_ANNOTATION.to_string(),
            serde_json::to_string(old_status)?,
        );
    }
    Ok(updated)
}

/// Copy of `service` with our finalizers and status annotations removed
#[must_use]
pub fn without_status(service: &Service) -> Service {
    let mut updated = service.clone();
    updated
        .finalizers_mut()
        .retain(|f| f != AUTONEG_FINALIZER && f != OLD_AUTONEG_FINALIZER);
    let annotations = updated.annotations_mut();
    annotations.remove(AUTONEG_STATUS_ANNOTATION);
    annotations.remove(OLD_AUTONEG_STATUS_ANNOTATION);
    updated
}

/// Reason and note of the event published per backend service
#[must_use]
pub fn backend_events(
    namespace: &str,
    name: &str,
    intended: &AutonegStatus,
    deleting: bool,
) -> Vec<(&'static str, String)> {
    intended
        .config
        .backend_services
        .iter()
        .flat_map(|(port, services)| {
            services.values().map(move |cfg| {
                if deleting {
                    (
                        reasons::DELETE,
                        format!(
                            "Deregistered NEGs for \"{namespace}/{name}\" from backend service \"{}\" (port {port})",
                            cfg.name
                        ),
                    )
                } else {
                    (
                        reasons::SYNC,
                        format!(
                            "Synced NEGs for \"{namespace}/{name}\" as backends to backend service \"{}\" (port {port})",
                            cfg.name
                        ),
                    )
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autoneg::{AutonegConfig, AutonegNegConfig};
    use std::collections::BTreeMap;

    fn service() -> Service {
        let mut service = Service::default();
        service.metadata.name = Some("web".to_string());
        service.metadata.namespace = Some("default".to_string());
        service.metadata.finalizers = Some(vec!["other/finalizer".to_string()]);
        service
    }

    fn status() -> AutonegStatus {
        AutonegStatus {
            config: AutonegConfig {
                backend_services: BTreeMap::from([(
                    "80".to_string(),
                    BTreeMap::from([(
                        "web-be".to_string(),
                        AutonegNegConfig {
                            name: "web-be".to_string(),
                            max_rate_per_endpoint: Some(100.0),
                            ..Default::default()
                        },
                    )]),
                )]),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_with_status_adds_finalizer_once() {
        let updated = with_status(&service(), &status(), None).unwrap();
        let again = with_status(&updated, &status(), None).unwrap();
        assert_eq!(
            again.finalizers(),
            &["other/finalizer".to_string(), AUTONEG_FINALIZER.to_string()]
        );
        let written: AutonegStatus =
            serde_json::from_str(&again.annotations()[AUTONEG_STATUS_ANNOTATION]).unwrap();
        assert_eq!(written, status());
        assert!(!again.annotations().contains_key(OLD_AUTONEG_STATUS_ANNOTATION));
    }

    #[test]
    fn test_without_status_clears_both_generations() {
        let mut svc = service();
        svc.metadata.finalizers = Some(vec![
            AUTONEG_FINALIZER.to_string(),
            "other/finalizer".to_string(),
            OLD_AUTONEG_FINALIZER.to_string(),
        ]);
        svc.metadata.annotations = Some(BTreeMap::from([
            (AUTONEG_STATUS_ANNOTATION.to_string(), "{}".to_string()),
            (OLD_AUTONEG_STATUS_ANNOTATION.to_string(), "{}".to_string()),
            ("keep".to_string(), "me".to_string()),
        ]));
        let updated = without_status(&svc);
        assert_eq!(updated.finalizers(), &["other/finalizer".to_string()]);
        assert_eq!(updated.annotations().len(), 1);
    }

    #[test]
    fn test_backend_event_notes() {
        let sync = backend_events("default", "web", &status(), false);
        assert_eq!(
            sync,
            vec![(
                "Sync",
                "Synced NEGs for \"default/web\" as backends to backend service \"web-be\" (port 80)"
                    .to_string()
            )]
        );
        let delete = backend_events("default", "web", &status(), true);
        assert_eq!(
            delete[0].1,
            "Deregistered NEGs for \"default/web\" from backend service \"web-be\" (port 80)"
        );
    }

    #[test]
    fn test_conflict_detection() {
        let conflict = ReconcilerError::Kube(kube::Error::Api(
            kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: "conflict".to_string(),
                reason: "Conflict".to_string(),
                code: 409,
            }
            .into(),
        ));
        assert!(conflict.is_conflict());
        assert!(!ReconcilerError::MissingMetadata("metadata.namespace").is_conflict());
    }
}
