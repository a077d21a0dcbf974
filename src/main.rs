//! # Autoneg Controller
//!
//! A Kubernetes controller that registers the Network Endpoint Groups of
//! annotated Services as backends of Google Cloud load balancer backend
//! services.
//!
//! ## Overview
//!
//! 1. **Watching Services** - All namespaces, annotated with
//!    `controller.autoneg.dev/neg` (or the legacy `anthos.cft.dev/autoneg`)
//! 2. **Reading NEG status** - Zones and NEG names written by the GKE NEG
//!    controller, optionally resolved from `ServiceNetworkEndpointGroup`
//!    resources
//! 3. **Updating backend services** - Adds, updates and removes zonal NEG
//!    backends through the Compute API
//! 4. **Cleaning up** - A finalizer deregisters everything before the
//!    Service goes away
//!
//! ## Features
//!
//! - **Global and regional** backend services
//! - **Rate, connection and custom-metric** balancing modes
//! - **Prometheus metrics** and health probes on `METRICS_PORT`

use anyhow::{Context, Result};
use autoneg_controller::config::ControllerConfig;
use autoneg_controller::constants::CONTROLLER_NAME;
use autoneg_controller::controller::{
    error_policy, reconcile, BackendController, KubeEventPublisher, KubeServiceWriter,
    NegZoneLookup, Reconciler, SvcNegLookup,
};
use autoneg_controller::gcp::auth::metadata_project_id;
use autoneg_controller::gcp::{ComputeClient, TokenSource};
use autoneg_controller::observability::logging::init_tracing;
use autoneg_controller::observability::Metrics;
use autoneg_controller::server::{start_server, ServerState};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::{controller, watcher, Controller};
use kube::{Api, Client};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // rustls needs a process-wide crypto provider before any TLS client is built
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }

    let config = ControllerConfig::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_format).context("Failed to initialize tracing")?;

    info!(
        build.timestamp = env!("BUILD_TIMESTAMP"),
        build.datetime = env!("BUILD_DATETIME"),
        build.git_hash = env!("BUILD_GIT_HASH"),
        "Starting Autoneg Controller"
    );
    info!(?config, "Loaded configuration");

    let metrics = Metrics::new().context("Failed to register metrics")?;
    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    // Start HTTP server for metrics and probes
    let server_state = Arc::new(ServerState::new(metrics.clone()));
    let server_handle = {
        let state = server_state.clone();
        let shutdown = shutdown.clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_server(port, state, shutdown).await {
                error!("HTTP server error: {}", e);
            }
        })
    };

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()
        .context("Failed to build HTTP client")?;

    let project_id = match &config.project_id {
        Some(project_id) => project_id.clone(),
        None => metadata_project_id(&http)
            .await
            .context("PROJECT_ID is not set and the metadata server did not provide one")?,
    };

    let tokens = match &config.gcp_access_token {
        Some(token) => TokenSource::fixed(token.clone()),
        None => TokenSource::metadata(http.clone()),
    };
    let compute = ComputeClient::new(http, config.compute_endpoint.clone(), project_id, tokens);
    info!(project_id = compute.project_id(), "Using Compute project");
    let backends = BackendController::new(compute, config.poll_settings(), metrics.clone());

    let zones: Option<Arc<dyn NegZoneLookup>> = if config.use_svcneg {
        Some(Arc::new(SvcNegLookup::new(client.clone())))
    } else {
        None
    };

    let reconciler = Arc::new(Reconciler {
        backends: Arc::new(backends),
        services: Arc::new(KubeServiceWriter::new(client.clone())),
        events: Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME)),
        zones,
        decoder: config.decoder_config()?,
        always_reconcile: config.always_reconcile,
        reconcile_period: config.reconcile_period(),
        error_requeue: config.reconciliation_error_requeue_duration(),
        metrics,
        cancel: shutdown.clone(),
        backoff_states: Mutex::new(HashMap::new()),
    });

    let services: Api<Service> = Api::all(client);

    // Mark as ready
    server_state.set_ready(true);

    Controller::new(services, watcher::Config::default())
        .with_config(
            controller::Config::default()
                .concurrency(config.max_concurrent_reconciliations),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler.clone())
        .for_each(|result| {
            // Deleted Services are never reconciled again
            if let Err(controller::Error::ObjectNotFound(object)) = &result {
                reconciler.forget_backoff(object.namespace.as_deref(), &object.name);
            }
            std::future::ready(())
        })
        .await;

    info!("Controller stopped");
    server_state.set_ready(false);
    shutdown.cancel();
    if let Err(e) = server_handle.await {
        warn!("HTTP server task ended abnormally: {}", e);
    }

    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM
///
/// The controller loop stops on the same signals; cancelling aborts its
/// operation polls in flight so it can drain.
async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
        () = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}
