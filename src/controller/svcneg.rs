//! # NEG Zones
//!
//! The GKE NEG controller publishes one `ServiceNetworkEndpointGroup` per
//! NEG. Its status lists the zonal NEGs by self link, from which the zones
//! are taken. Used instead of the zones in `cloud.google.com/neg-status`
//! when `USE_SVCNEG` is enabled.

use crate::autoneg::NegStatus;
use async_trait::async_trait;
use kube::{Api, Client, CustomResource};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::debug;

#[allow(
    clippy::empty_structs_with_brackets,
    reason = "The CustomResource derive needs a braced spec struct"
)]
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "networking.gke.io",
    version = "v1beta1",
    kind = "ServiceNetworkEndpointGroup",
    plural = "servicenetworkendpointgroups",
    shortname = "svcneg",
    namespaced,
    status = "ServiceNetworkEndpointGroupStatus"
)]
pub struct ServiceNetworkEndpointGroupSpec {}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceNetworkEndpointGroupStatus {
    #[serde(default)]
    pub network_endpoint_groups: Vec<NegObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,
}

/// One zonal NEG
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NegObjectReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_endpoint_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
}

static ZONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"zones/([^/]+)/").expect("zone pattern compiles"));

/// Zone named in a NEG self link
#[must_use]
pub fn zone_from_self_link(self_link: &str) -> Option<String> {
    ZONE_PATTERN
        .captures(self_link)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Zones of all NEGs listed in a status
#[must_use]
pub fn zones_from_status(status: &ServiceNetworkEndpointGroupStatus) -> BTreeSet<String> {
    status
        .network_endpoint_groups
        .iter()
        .filter_map(|neg| neg.self_link.as_deref())
        .filter_map(zone_from_self_link)
        .collect()
}

/// Looks up the zones a NEG exists in
#[async_trait]
pub trait NegZoneLookup: Send + Sync {
    /// Zones of NEG `neg` in `namespace`; empty when the NEG is unknown
    ///
    /// # Errors
    /// Returns Kubernetes API errors other than not-found.
    async fn zones(&self, namespace: &str, neg: &str) -> Result<BTreeSet<String>, kube::Error>;
}

/// [`NegZoneLookup`] reading `ServiceNetworkEndpointGroup` resources
#[derive(Clone)]
pub struct SvcNegLookup {
    client: Client,
}

impl std::fmt::Debug for SvcNegLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SvcNegLookup").finish_non_exhaustive()
    }
}

impl SvcNegLookup {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NegZoneLookup for SvcNegLookup {
    async fn zones(&self, namespace: &str, neg: &str) -> Result<BTreeSet<String>, kube::Error> {
        let api: Api<ServiceNetworkEndpointGroup> = Api::namespaced(self.client.clone(), namespace);
        let Some(svcneg) = api.get_opt(neg).await? else {
            debug!(namespace, neg, "ServiceNetworkEndpointGroup not found");
            return Ok(BTreeSet::new());
        };
        Ok(svcneg
            .status
            .as_ref()
            .map(zones_from_status)
            .unwrap_or_default())
    }
}

/// Replace the zones of `neg_status` with those of its NEG resources
///
/// # Errors
/// Returns the first lookup error.
pub async fn resolve_zones(
    lookup: &dyn NegZoneLookup,
    namespace: &str,
    neg_status: &NegStatus,
) -> Result<NegStatus, kube::Error> {
    let negs: BTreeSet<&String> = neg_status.network_endpoint_groups.values().collect();
    let mut zones = BTreeSet::new();
    for neg in negs {
        zones.extend(lookup.zones(namespace, neg).await?);
    }
    Ok(NegStatus {
        network_endpoint_groups: neg_status.network_endpoint_groups.clone(),
        zones: zones.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    #[test]
    fn test_zone_pattern_compiles() {
        assert_eq!(ZONE_PATTERN.captures_len(), 2);
    }

    #[test]
    fn test_zone_from_self_link() {
        assert_eq!(
            zone_from_self_link(
                "https://www.googleapis.com/compute/v1/projects/p/zones/europe-west4-a/networkEndpointGroups/k8s1-neg"
            )
            .as_deref(),
            Some("europe-west4-a")
        );
        assert_eq!(zone_from_self_link("projects/p/global/backendServices/x"), None);
    }

    #[test]
    fn test_zones_from_status_deduplicates() {
        let link = |z: &str| NegObjectReference {
            self_link: Some(format!("projects/p/zones/{z}/networkEndpointGroups/neg")),
            ..Default::default()
        };
        let status = ServiceNetworkEndpointGroupStatus {
            network_endpoint_groups: vec![link("b"), link("a"), link("b"), NegObjectReference::default()],
            last_sync_time: None,
        };
        let zones: Vec<String> = zones_from_status(&status).into_iter().collect();
        assert_eq!(zones, vec!["a", "b"]);
    }

    struct FakeLookup(HashMap<String, Vec<&'static str>>);

    #[async_trait]
    impl NegZoneLookup for FakeLookup {
        async fn zones(&self, _namespace: &str, neg: &str) -> Result<BTreeSet<String>, kube::Error> {
            Ok(self
                .0
                .get(neg)
                .map(|z| z.iter().map(|s| (*s).to_string()).collect())
                .unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_resolve_zones_unions_negs() {
        let lookup = FakeLookup(HashMap::from([
            ("neg-80".to_string(), vec!["zone1", "zone2"]),
            ("neg-443".to_string(), vec!["zone2", "zone3"]),
        ]));
        let status = NegStatus {
            network_endpoint_groups: BTreeMap::from([
                ("80".to_string(), "neg-80".to_string()),
                ("443".to_string(), "neg-443".to_string()),
                ("8080".to_string(), "missing".to_string()),
            ]),
            zones: vec!["stale".to_string()],
        };
        let resolved = resolve_zones(&lookup, "default", &status).await.unwrap();
        assert_eq!(resolved.zones, vec!["zone1", "zone2", "zone3"]);
        assert_eq!(resolved.network_endpoint_groups, status.network_endpoint_groups);
    }
}
