//! # Reconciliation Engine
//!
//! Diffs the last reconciled status against the intended one and produces,
//! per port and backend service, the backend entries to remove and to upsert.
//!
//! A backend group is one `(zone, NEG)` pair expressed as a URL. For a backend
//! service that keeps its identity only groups that disappeared are removed.
//! When the identity changes (a different name or region) every actual group
//! is evacuated from the old backend service before the new one is filled.
//!
//! The `removes` and `upserts` maps of a [`BackendPlan`] always have the same
//! keys, so the mutation layer can walk them pairwise.

use super::backend::backend_for;
use super::types::{AutonegNegConfig, AutonegStatus, Backends, NegStatus};
use crate::constants::GROUP_URL_PREFIX;
use crate::gcp::types::Backend;
use std::collections::{BTreeMap, BTreeSet};

/// Port to backend service key to bundle
pub type BackendsByPort = BTreeMap<String, BTreeMap<String, Backends>>;

/// Output of [`reconcile_status`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendPlan {
    pub removes: BackendsByPort,
    pub upserts: BackendsByPort,
}

impl BackendPlan {
    /// Walk `(port, key, remove, upsert)` in sorted order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str, &Backends, &Backends)> {
        self.removes.iter().flat_map(move |(port, removes)| {
            removes.iter().filter_map(move |(key, remove)| {
                self.upserts
                    .get(port)
                    .and_then(|upserts| upserts.get(key))
                    .map(|upsert| (port.as_str(), key.as_str(), remove, upsert))
            })
        })
    }

    /// True when applying the plan would not touch any backend
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.removes
            .values()
            .chain(self.upserts.values())
            .flat_map(BTreeMap::values)
            .all(|b| b.backends.is_empty())
    }

    fn insert(&mut self, port: &str, key: &str, remove: Backends, upsert: Backends) {
        self.removes
            .entry(port.to_string())
            .or_default()
            .insert(key.to_string(), remove);
        self.upserts
            .entry(port.to_string())
            .or_default()
            .insert(key.to_string(), upsert);
    }
}

/// URL of the NEG `neg` in `zone`, as stored on backend services
#[must_use]
pub fn group_url(project: &str, zone: &str, neg: &str) -> String {
    format!("{GROUP_URL_PREFIX}/projects/{project}/zones/{zone}/networkEndpointGroups/{neg}")
}

/// Port to the set of group URLs published for it
fn index_groups(project: &str, neg_status: &NegStatus) -> BTreeMap<String, BTreeSet<String>> {
    neg_status
        .network_endpoint_groups
        .iter()
        .map(|(port, neg)| {
            let groups = neg_status
                .zones
                .iter()
                .map(|zone| group_url(project, zone, neg))
                .collect();
            (port.clone(), groups)
        })
        .collect()
}

fn removal(groups: &BTreeSet<String>) -> Vec<Backend> {
    groups.iter().map(Backend::for_group).collect()
}

/// Whether `actual` and `intended` address the same backend service.
///
/// An actual entry without a name has not been assigned yet and matches.
fn same_backend_service(actual: &AutonegNegConfig, intended: &AutonegNegConfig) -> bool {
    actual.name.is_empty() || (actual.name == intended.name && actual.region() == intended.region())
}

/// Compute the backends to remove and upsert to move from `actual` to
/// `intended`.
#[must_use]
pub fn reconcile_status(project: &str, actual: &AutonegStatus, intended: &AutonegStatus) -> BackendPlan {
    let actual_groups = index_groups(project, &actual.neg_status);
    let intended_groups = index_groups(project, &intended.neg_status);
    let none = BTreeSet::new();
    let mut plan = BackendPlan::default();

    for (port, services) in &intended.config.backend_services {
        let wanted = intended_groups.get(port).unwrap_or(&none);
        let existing = actual_groups.get(port).unwrap_or(&none);
        let actual_services = actual.config.backend_services.get(port);

        for (key, cfg) in services {
            let mut upsert = Backends::new(&cfg.name, cfg.region());
            upsert.backends = wanted.iter().map(|group| backend_for(cfg, group)).collect();

            let remove = match actual_services.and_then(|s| s.get(key)) {
                Some(prev) if same_backend_service(prev, cfg) => {
                    let mut remove = Backends::new(&cfg.name, cfg.region());
                    remove.backends = removal(&existing.difference(wanted).cloned().collect());
                    remove
                }
                Some(prev) => {
                    let mut remove = Backends::new(&prev.name, prev.region());
                    remove.backends = removal(existing);
                    remove
                }
                None => Backends::new(&cfg.name, cfg.region()),
            };

            plan.insert(port, key, remove, upsert);
        }
    }

    // Backend services, or whole ports, no longer wanted are drained.
    for (port, services) in &actual.config.backend_services {
        let existing = actual_groups.get(port).unwrap_or(&none);
        let wanted_services = intended.config.backend_services.get(port);
        for (key, prev) in services {
            if wanted_services.is_some_and(|s| s.contains_key(key)) {
                continue;
            }
            let name = if prev.name.is_empty() { key } else { &prev.name };
            let mut remove = Backends::new(name.as_str(), prev.region());
            remove.backends = removal(existing);
            let upsert = Backends::new(name.as_str(), prev.region());
            plan.insert(port, key, remove, upsert);
        }
    }

    plan
}
