//! Common test utilities
//!
//! Compute API fixtures served by `wiremock` and annotation builders shared
//! by the integration tests.

#![allow(dead_code)]

use autoneg_controller::autoneg::{
    AutonegConfig, AutonegNegConfig, AutonegStatus, NegStatus,
};
use autoneg_controller::gcp::operation::PollSettings;
use autoneg_controller::gcp::{ComputeClient, TokenSource};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Once;
use std::time::Duration;
use wiremock::MockServer;

pub const PROJECT: &str = "test-project";
pub const TOKEN: &str = "test-token";

static RUSTLS_INIT: Once = Once::new();

/// Initialize rustls crypto provider for tests
///
/// Uses a `Once` to ensure it's only called once across all tests.
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Compute client pointed at `server` with a static token
pub fn compute_client(server: &MockServer) -> ComputeClient {
    init_rustls();
    ComputeClient::new(
        reqwest::Client::new(),
        server.uri(),
        PROJECT,
        TokenSource::fixed(TOKEN),
    )
}

/// Polling fast enough for tests
pub fn fast_poll() -> PollSettings {
    PollSettings {
        initial_interval: Duration::from_millis(5),
        multiplier: 1.5,
        randomization: 0.0,
        max_interval: Duration::from_millis(20),
        timeout: Duration::from_secs(5),
    }
}

pub fn global_path(name: &str) -> String {
    format!("/projects/{PROJECT}/global/backendServices/{name}")
}

pub fn regional_path(region: &str, name: &str) -> String {
    format!("/projects/{PROJECT}/regions/{region}/backendServices/{name}")
}

pub fn group(zone: &str, neg: &str) -> String {
    format!(
        "https://www.googleapis.com/compute/v1/projects/{PROJECT}/zones/{zone}/networkEndpointGroups/{neg}"
    )
}

/// Backend service response body
pub fn backend_service(name: &str, backends: Value) -> Value {
    json!({
        "name": name,
        "backends": backends,
        "fingerprint": "abc=",
    })
}

pub fn operation(name: &str, status: &str) -> Value {
    json!({ "name": name, "status": status })
}

/// Rate-balanced backend config for `name`
pub fn rate_config(name: &str, region: Option<&str>, rate: f64) -> AutonegNegConfig {
    AutonegNegConfig {
        name: name.to_string(),
        region: region.map(str::to_string),
        max_rate_per_endpoint: Some(rate),
        ..Default::default()
    }
}

/// Status with one backend service per port and NEGs named `neg-<port>`
pub fn status(ports: &[(&str, AutonegNegConfig)], zones: &[&str]) -> AutonegStatus {
    let mut backend_services: BTreeMap<String, BTreeMap<String, AutonegNegConfig>> =
        BTreeMap::new();
    let mut network_endpoint_groups = BTreeMap::new();
    for (port, cfg) in ports {
        backend_services
            .entry((*port).to_string())
            .or_default()
            .insert(cfg.name.clone(), cfg.clone());
        network_endpoint_groups.insert((*port).to_string(), format!("neg-{port}"));
    }
    AutonegStatus {
        config: AutonegConfig { backend_services },
        neg_status: NegStatus {
            network_endpoint_groups,
            zones: zones.iter().map(|z| (*z).to_string()).collect(),
        },
        sync: None,
    }
}
