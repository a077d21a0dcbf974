//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! The collectors live in a [`Metrics`] value that owns its own [`Registry`]
//! and is handed to the reconciler and the HTTP server at start-up.
//!
//! ## Metrics Exposed
//!
//! - `autoneg_reconciliations_total` - Total number of reconciliations
//! - `autoneg_reconciliation_errors_total` - Total number of reconciliation errors
//! - `autoneg_reconciliation_duration_seconds` - Duration of reconciliations
//! - `autoneg_backend_service_operations_total` - Compute calls by operation and outcome
//! - `autoneg_operation_poll_duration_seconds` - Time spent waiting for Compute operations
//! - `autoneg_config_errors_total` - Services rejected for invalid annotations

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Controller metrics and the registry they are registered in
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    reconciliations_total: IntCounter,
    reconciliation_errors_total: IntCounter,
    reconciliation_duration: Histogram,
    backend_service_operations_total: IntCounterVec,
    operation_poll_duration: Histogram,
    config_errors_total: IntCounter,
}

impl Metrics {
    /// Create and register all collectors in a fresh registry
    ///
    /// # Errors
    /// Returns an error if a collector cannot be created or registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations_total = IntCounter::new(
            "autoneg_reconciliations_total",
            "Total number of reconciliations",
        )?;
        let reconciliation_errors_total = IntCounter::new(
            "autoneg_reconciliation_errors_total",
            "Total number of reconciliation errors",
        )?;
        let reconciliation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "autoneg_reconciliation_duration_seconds",
                "Duration of reconciliation in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 240.0]),
        )?;
        let backend_service_operations_total = IntCounterVec::new(
            Opts::new(
                "autoneg_backend_service_operations_total",
                "Total number of Compute backend service operations",
            ),
            &["operation", "outcome"],
        )?;
        let operation_poll_duration = Histogram::with_opts(
            HistogramOpts::new(
                "autoneg_operation_poll_duration_seconds",
                "Time spent waiting for Compute operations in seconds",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 240.0]),
        )?;
        let config_errors_total = IntCounter::new(
            "autoneg_config_errors_total",
            "Total number of Services rejected for invalid autoneg annotations",
        )?;

        registry.register(Box::new(reconciliations_total.clone()))?;
        registry.register(Box::new(reconciliation_errors_total.clone()))?;
        registry.register(Box::new(reconciliation_duration.clone()))?;
        registry.register(Box::new(backend_service_operations_total.clone()))?;
        registry.register(Box::new(operation_poll_duration.clone()))?;
        registry.register(Box::new(config_errors_total.clone()))?;

        Ok(Self {
            registry,
            reconciliations_total,
            reconciliation_errors_total,
            reconciliation_duration,
            backend_service_operations_total,
            operation_poll_duration,
            config_errors_total,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn increment_reconciliations(&self) {
        self.reconciliations_total.inc();
    }

    pub fn increment_reconciliation_errors(&self) {
        self.reconciliation_errors_total.inc();
    }

    pub fn observe_reconciliation_duration(&self, seconds: f64) {
        self.reconciliation_duration.observe(seconds);
    }

    /// Count one Compute call; `operation` is `get`, `patch` or `poll`
    pub fn record_backend_service_operation(&self, operation: &str, outcome: &str) {
        self.backend_service_operations_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn observe_operation_poll_duration(&self, seconds: f64) {
        self.operation_poll_duration.observe(seconds);
    }

    pub fn increment_config_errors(&self) {
        self.config_errors_total.inc();
    }

    /// Render all metrics in the Prometheus text format
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registries_are_independent() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.increment_reconciliations();
        assert_eq!(first.reconciliations_total.get(), 1);
        assert_eq!(second.reconciliations_total.get(), 0);
    }

    #[test]
    fn test_increment_reconciliation_errors() {
        let metrics = Metrics::new().unwrap();
        metrics.increment_reconciliation_errors();
        metrics.increment_config_errors();
        assert_eq!(metrics.reconciliation_errors_total.get(), 1);
        assert_eq!(metrics.config_errors_total.get(), 1);
    }

    #[test]
    fn test_backend_service_operations_are_labelled() {
        let metrics = Metrics::new().unwrap();
        metrics.record_backend_service_operation("patch", "success");
        metrics.record_backend_service_operation("patch", "success");
        metrics.record_backend_service_operation("get", "not_found");
        assert_eq!(
            metrics
                .backend_service_operations_total
                .with_label_values(&["patch", "success"])
                .get(),
            2
        );
    }

    #[test]
    fn test_encode_contains_metric_names() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_reconciliation_duration(1.5);
        metrics.observe_operation_poll_duration(0.5);
        let text = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(text.contains("autoneg_reconciliation_duration_seconds"));
        assert!(text.contains("autoneg_operation_poll_duration_seconds"));
        assert!(text.contains("autoneg_reconciliations_total"));
    }
}
