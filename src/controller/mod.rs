//! # Controller
//!
//! Kubernetes side of the autoneg controller.
//!
//! - `backoff`: retry intervals for reconciliation errors and operation polling
//! - `backends`: applies backend plans through the Compute API
//! - `error_policy`: requeue decisions after a failed reconciliation
//! - `events`: Kubernetes Events on Services
//! - `reconciler`: the reconciliation pass for one Service
//! - `svcneg`: NEG zones from `ServiceNetworkEndpointGroup` resources

pub mod backends;
pub mod backoff;
pub mod error_policy;
pub mod events;
pub mod reconciler;
pub mod svcneg;

pub use backends::{BackendController, BackendReconciler};
pub use error_policy::error_policy;
pub use events::{EventPublisher, KubeEventPublisher};
pub use reconciler::{reconcile, KubeServiceWriter, Reconciler, ReconcilerError, ServiceWriter};
pub use svcneg::{NegZoneLookup, SvcNegLookup};
