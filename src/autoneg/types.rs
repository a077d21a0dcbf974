//! # Autoneg Data Model
//!
//! Typed forms of the annotations read from and written to a Service.
//!
//! Nested maps are `BTreeMap` so iteration order is always sorted. Optional
//! numeric fields are `Option` so an unset value is never confused with an
//! explicit zero.

use crate::gcp::types::Backend;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Port (as the string key used in annotations) to backend service name to config
pub type BackendServiceMap = BTreeMap<String, BTreeMap<String, AutonegNegConfig>>;

/// Treat an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// NEG controller output, `cloud.google.com/neg-status`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegStatus {
    /// Port to NEG name
    #[serde(default, deserialize_with = "null_as_default")]
    pub network_endpoint_groups: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub zones: Vec<String>,
}

/// NEG controller input, `cloud.google.com/neg`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub exposed_ports: BTreeMap<String, ExposedPort>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposedPort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A custom metric used by the `CUSTOM_METRICS` balancing mode
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomMetric {
    pub name: String,
    #[serde(default)]
    pub max_utilization: f64,
    #[serde(default)]
    pub dry_run: bool,
}

/// One backend service target for one port
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutonegNegConfig {
    #[serde(default)]
    pub name: String,
    /// Unset or empty means a global backend service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rate_per_endpoint: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections_per_endpoint: Option<i64>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub custom_metrics: Vec<CustomMetric>,
    /// Percentage applied once when a backend is first added
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_capacity: Option<i32>,
    /// Percentage kept in sync when [`SyncConfig::capacity_scaler`] is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_scaler: Option<i32>,
}

impl AutonegNegConfig {
    /// Region of the target backend service, `None` for global
    #[must_use]
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref().filter(|r| !r.is_empty())
    }
}

/// Desired configuration as written by users, `controller.autoneg.dev/neg`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutonegAnnotation {
    #[serde(default, deserialize_with = "null_as_default")]
    pub backend_services: BTreeMap<String, Vec<AutonegNegConfig>>,
}

/// Desired configuration keyed by port and backend service name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutonegConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub backend_services: BackendServiceMap,
}

/// `controller.autoneg.dev/sync`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub capacity_scaler: bool,
}

/// Last reconciled state, `controller.autoneg.dev/neg-status`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutonegStatus {
    #[serde(flatten)]
    pub config: AutonegConfig,
    #[serde(flatten)]
    pub neg_status: NegStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncConfig>,
}

impl AutonegStatus {
    /// Whether capacity scaler changes should be pushed to existing backends
    #[must_use]
    pub fn sync_capacity_scaler(&self) -> bool {
        self.sync.is_some_and(|s| s.capacity_scaler)
    }
}

/// Deprecated single backend configuration, `anthos.cft.dev/autoneg`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OldAutonegConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub max_rate_per_endpoint: f64,
}

/// Deprecated reconciled state, `anthos.cft.dev/autoneg-status`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OldAutonegStatus {
    #[serde(flatten)]
    pub config: OldAutonegConfig,
    #[serde(flatten)]
    pub neg_status: NegStatus,
}

/// Everything decoded from one Service's annotations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statuses {
    /// Desired configuration, translated from the legacy form when needed
    pub config: AutonegConfig,
    /// Last reconciled state, translated from the legacy form when needed
    pub status: AutonegStatus,
    /// Legacy configuration as applied, written back beside the current status
    pub old_config: OldAutonegConfig,
    pub neg_status: NegStatus,
    pub neg_config: NegConfig,
    pub sync_config: Option<SyncConfig>,
    /// The current desired configuration annotation is present
    pub new_config: bool,
}

/// Backend entries to remove from, or upsert into, one backend service
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Backends {
    pub name: String,
    pub region: Option<String>,
    pub backends: Vec<Backend>,
}

impl Backends {
    #[must_use]
    pub fn new(name: impl Into<String>, region: Option<&str>) -> Self {
        Self {
            name: name.into(),
            region: region.filter(|r| !r.is_empty()).map(str::to_string),
            backends: Vec::new(),
        }
    }

    /// Same target backend service (name and region)
    #[must_use]
    pub fn same_target(&self, other: &Self) -> bool {
        self.name == other.name && self.region == other.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neg_status_accepts_null_fields() {
        let status: NegStatus =
            serde_json::from_str(r#"{"network_endpoint_groups":null,"zones":null}"#).unwrap();
        assert_eq!(status, NegStatus::default());
    }

    #[test]
    fn test_status_reads_earlier_controller_output() {
        let raw = r#"{"backend_services":{"4242":{"namespace-old-service-4242-de64ba2d":{"name":"namespace-old-service-4242-de64ba2d","max_rate_per_endpoint":4242}}},"network_endpoint_groups":null,"zones":null}"#;
        let status: AutonegStatus = serde_json::from_str(raw).unwrap();
        let cfg = &status.config.backend_services["4242"]["namespace-old-service-4242-de64ba2d"];
        assert_eq!(cfg.max_rate_per_endpoint, Some(4242.0));
        assert_eq!(cfg.max_connections_per_endpoint, None);
        assert!(status.neg_status.zones.is_empty());
        assert!(status.sync.is_none());
    }

    #[test]
    fn test_status_omits_unset_fields() {
        let mut status = AutonegStatus::default();
        status.config.backend_services.entry("80".to_string()).or_default().insert(
            "web".to_string(),
            AutonegNegConfig {
                name: "web".to_string(),
                max_connections_per_endpoint: Some(5),
                ..Default::default()
            },
        );
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(
            json["backend_services"]["80"]["web"],
            serde_json::json!({"name": "web", "max_connections_per_endpoint": 5})
        );
        assert!(json.get("sync").is_none());
    }

    #[test]
    fn test_old_config_rejects_string_rate() {
        let result =
            serde_json::from_str::<OldAutonegConfig>(r#"{"name":"test","max_rate_per_endpoint":"100"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_old_status_flattens_neg_status() {
        let status: OldAutonegStatus = serde_json::from_str(
            r#"{"name":"test","max_rate_per_endpoint":100,"network_endpoint_groups":{"80":"neg"},"zones":["z1"]}"#,
        )
        .unwrap();
        assert_eq!(status.config.name, "test");
        assert_eq!(status.neg_status.network_endpoint_groups["80"], "neg");
        assert_eq!(status.neg_status.zones, vec!["z1"]);
    }

    #[test]
    fn test_empty_region_is_global() {
        let cfg = AutonegNegConfig {
            region: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(cfg.region(), None);
        assert_eq!(Backends::new("bs", Some("")).region, None);
    }
}
