//! Validation of desired backend configuration
//!
//! A violation rejects the whole configuration.

use super::types::{AutonegConfig, AutonegNegConfig};
use super::ConfigError;

/// Active (non dry-run) custom metrics allowed per backend
pub const MAX_ACTIVE_CUSTOM_METRICS: usize = 3;

/// Validate every backend service entry of a desired configuration.
///
/// # Errors
/// Returns the first rule violated, see [`validate_neg_config`].
pub fn validate_config(config: &AutonegConfig) -> Result<(), ConfigError> {
    for (port, services) in &config.backend_services {
        for cfg in services.values() {
            validate_neg_config(port, cfg)?;
        }
    }
    Ok(())
}

/// Validate one backend service entry.
///
/// # Errors
/// - rate and connections both positive
/// - `initial_capacity` or `capacity_scaler` outside `0..=100`
/// - a custom metric past the third that is not `dry_run`
/// - a custom metric `max_utilization` outside `0.0..=1.0`
pub fn validate_neg_config(port: &str, cfg: &AutonegNegConfig) -> Result<(), ConfigError> {
    let rate = cfg.max_rate_per_endpoint.unwrap_or_default();
    let connections = cfg.max_connections_per_endpoint.unwrap_or_default();
    if rate > 0.0 && connections > 0 {
        return Err(ConfigError::RateAndConnections {
            port: port.to_string(),
            name: cfg.name.clone(),
        });
    }

    for (field, value) in [
        ("initial_capacity", cfg.initial_capacity),
        ("capacity_scaler", cfg.capacity_scaler),
    ] {
        if let Some(value) = value {
            if !(0..=100).contains(&value) {
                return Err(ConfigError::PercentageOutOfRange {
                    port: port.to_string(),
                    name: cfg.name.clone(),
                    field,
                    value,
                });
            }
        }
    }

    for (index, metric) in cfg.custom_metrics.iter().enumerate() {
        if index >= MAX_ACTIVE_CUSTOM_METRICS && !metric.dry_run {
            return Err(ConfigError::TooManyCustomMetrics {
                port: port.to_string(),
                name: cfg.name.clone(),
                index,
                metric: metric.name.clone(),
            });
        }
        if !(0.0..=1.0).contains(&metric.max_utilization) {
            return Err(ConfigError::MaxUtilizationOutOfRange {
                port: port.to_string(),
                name: cfg.name.clone(),
                metric: metric.name.clone(),
                value: metric.max_utilization,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autoneg::types::CustomMetric;

    fn metric(name: &str, max_utilization: f64, dry_run: bool) -> CustomMetric {
        CustomMetric {
            name: name.to_string(),
            max_utilization,
            dry_run,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_neg_config("80", &AutonegNegConfig::default()).is_ok());
    }

    #[test]
    fn test_rate_and_connections_conflict() {
        let cfg = AutonegNegConfig {
            max_rate_per_endpoint: Some(100.0),
            max_connections_per_endpoint: Some(10),
            ..Default::default()
        };
        assert!(matches!(
            validate_neg_config("80", &cfg),
            Err(ConfigError::RateAndConnections { .. })
        ));

        let zero_connections = AutonegNegConfig {
            max_rate_per_endpoint: Some(100.0),
            max_connections_per_endpoint: Some(0),
            ..Default::default()
        };
        assert!(validate_neg_config("80", &zero_connections).is_ok());
    }

    #[test]
    fn test_capacity_bounds() {
        for value in [0, 50, 100] {
            let cfg = AutonegNegConfig {
                initial_capacity: Some(value),
                capacity_scaler: Some(value),
                ..Default::default()
            };
            assert!(validate_neg_config("80", &cfg).is_ok(), "{value} should be accepted");
        }
        for value in [-1, 101] {
            let initial = AutonegNegConfig {
                initial_capacity: Some(value),
                ..Default::default()
            };
            assert!(matches!(
                validate_neg_config("80", &initial),
                Err(ConfigError::PercentageOutOfRange { field: "initial_capacity", .. })
            ));
            let scaler = AutonegNegConfig {
                capacity_scaler: Some(value),
                ..Default::default()
            };
            assert!(matches!(
                validate_neg_config("80", &scaler),
                Err(ConfigError::PercentageOutOfRange { field: "capacity_scaler", .. })
            ));
        }
    }

    #[test]
    fn test_custom_metric_limit_allows_dry_run_overflow() {
        let cfg = AutonegNegConfig {
            custom_metrics: vec![
                metric("a", 0.5, false),
                metric("b", 0.5, false),
                metric("c", 0.5, false),
                metric("d", 0.5, true),
                metric("e", 0.5, true),
            ],
            ..Default::default()
        };
        assert!(validate_neg_config("80", &cfg).is_ok());
    }

    #[test]
    fn test_custom_metric_limit_rejects_fourth_active_metric() {
        let cfg = AutonegNegConfig {
            custom_metrics: vec![
                metric("a", 0.5, true),
                metric("b", 0.5, false),
                metric("c", 0.5, false),
                metric("d", 0.5, false),
            ],
            ..Default::default()
        };
        assert!(matches!(
            validate_neg_config("80", &cfg),
            Err(ConfigError::TooManyCustomMetrics { index: 3, .. })
        ));
    }

    #[test]
    fn test_custom_metric_utilization_bounds() {
        for value in [-0.1, 1.5] {
            let cfg = AutonegNegConfig {
                custom_metrics: vec![metric("a", value, false)],
                ..Default::default()
            };
            assert!(matches!(
                validate_neg_config("80", &cfg),
                Err(ConfigError::MaxUtilizationOutOfRange { .. })
            ));
        }
    }
}
