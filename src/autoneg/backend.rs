//! Backend entry computation
//!
//! Balancing mode precedence: custom metrics, then rate, then connections.

use super::types::AutonegNegConfig;
use crate::gcp::types::{Backend, BackendCustomMetric, BalancingMode};

/// Balancing mode a backend config resolves to
#[must_use]
pub fn balancing_mode(cfg: &AutonegNegConfig) -> BalancingMode {
    if !cfg.custom_metrics.is_empty() {
        BalancingMode::CustomMetrics
    } else if cfg.max_rate_per_endpoint.unwrap_or_default() > 0.0 {
        BalancingMode::Rate
    } else {
        BalancingMode::Connection
    }
}

/// Capacity scaler in `[0.0, 1.0]`
///
/// Defaults to full capacity. `initial_capacity` overrides the default and
/// `capacity_scaler` overrides both.
#[must_use]
pub fn capacity_scaler(cfg: &AutonegNegConfig) -> f64 {
    let mut scaler = 1.0;
    if let Some(initial) = cfg.initial_capacity {
        scaler = f64::from(initial) / 100.0;
    }
    if let Some(capacity) = cfg.capacity_scaler {
        scaler = f64::from(capacity) / 100.0;
    }
    scaler.clamp(0.0, 1.0)
}

/// The backend entry for `group` as described by `cfg`
#[must_use]
pub fn backend_for(cfg: &AutonegNegConfig, group: &str) -> Backend {
    let mut backend = Backend::for_group(group);
    apply_balancing(&mut backend, cfg);
    backend.capacity_scaler = Some(capacity_scaler(cfg));
    backend
}

/// Set the balancing fields of `backend` from `cfg`, clearing those of other
/// modes. The capacity scaler is left alone.
pub fn apply_balancing(backend: &mut Backend, cfg: &AutonegNegConfig) {
    let mode = balancing_mode(cfg);
    backend.max_rate_per_endpoint = None;
    backend.max_connections_per_endpoint = None;
    backend.custom_metrics = Vec::new();
    match mode {
        BalancingMode::CustomMetrics => {
            backend.custom_metrics = cfg
                .custom_metrics
                .iter()
                .map(|m| BackendCustomMetric {
                    name: m.name.clone(),
                    max_utilization: Some(m.max_utilization),
                    dry_run: Some(m.dry_run),
                    ..Default::default()
                })
                .collect();
        }
        BalancingMode::Rate => backend.max_rate_per_endpoint = cfg.max_rate_per_endpoint,
        BalancingMode::Connection | BalancingMode::Other(_) => {
            backend.max_connections_per_endpoint = cfg.max_connections_per_endpoint;
        }
    }
    backend.balancing_mode = Some(mode);
}

/// Copy the balancing fields of a computed backend onto an existing one.
pub fn copy_balancing(target: &mut Backend, source: &Backend) {
    target.balancing_mode = source.balancing_mode.clone();
    target.max_rate_per_endpoint = source.max_rate_per_endpoint;
    target.max_connections_per_endpoint = source.max_connections_per_endpoint;
    target.custom_metrics = source.custom_metrics.clone();
}
