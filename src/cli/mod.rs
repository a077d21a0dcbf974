//! # autonegctl
//!
//! Offline helper for the Autoneg Controller.
//!
//! Runs the controller's naming and planning logic locally, without talking
//! to Kubernetes or Google Cloud.
//!
//! ## Usage
//!
//! ```bash
//! # Backend service name generated for port 80 of default/web
//! autonegctl name --namespace default --name web --port 80
//!
//! # Backend changes the controller would make for a Service's annotations
//! kubectl get svc web -o jsonpath='{.metadata.annotations}' > annotations.json
//! autonegctl plan --project my-project --annotations annotations.json --name web
//! ```

use anyhow::{bail, Context, Result};
use autoneg_controller::autoneg::{decode, reconcile_status, AutonegStatus, NameTemplate};
use autoneg_controller::config::ControllerConfig;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Autoneg Controller CLI
#[derive(Parser)]
#[command(name = "autonegctl")]
#[command(
    about = "Autoneg Controller CLI",
    long_about = None,
    after_help = "\
Decoder settings (DEFAULT_BACKENDSERVICE_NAME, MAX_RATE_PER_ENDPOINT, ...)
are read from the same environment variables as the controller.

Examples:
  autonegctl name --namespace default --name web --port 80
  autonegctl plan --project my-project --annotations annotations.json --name web
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the backend service name generated for a Service port
    Name {
        /// Service namespace
        #[arg(short, long, default_value = "default")]
        namespace: String,

        /// Service name
        #[arg(long)]
        name: String,

        /// Service port
        #[arg(short, long)]
        port: String,

        /// Name template, overrides DEFAULT_BACKENDSERVICE_NAME
        #[arg(short, long)]
        template: Option<String>,
    },
    /// Print the backend changes for a set of Service annotations
    Plan {
        /// Project hosting the backend services
        #[arg(long)]
        project: String,

        /// JSON object of Service annotations
        #[arg(short, long, value_name = "FILE")]
        annotations: PathBuf,

        /// Service namespace
        #[arg(short, long, default_value = "default")]
        namespace: String,

        /// Service name
        #[arg(long, default_value = "service")]
        name: String,

        /// Plan the teardown performed when the Service is deleted
        #[arg(long)]
        deleting: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ControllerConfig::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Name {
            namespace,
            name,
            port,
            template,
        } => {
            let template = template.unwrap_or(config.service_name_template);
            let template = NameTemplate::parse(&template)
                .with_context(|| format!("Invalid name template {template:?}"))?;
            println!("{}", template.generate(&namespace, &name, &port));
        }
        Commands::Plan {
            project,
            annotations,
            namespace,
            name,
            deleting,
        } => {
            let raw = std::fs::read_to_string(&annotations)
                .with_context(|| format!("Failed to read {}", annotations.display()))?;
            let annotations: BTreeMap<String, String> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a JSON object of strings", annotations.display()))?;
            let decoder = config.decoder_config()?;

            let Some(statuses) = decode(&namespace, &name, &annotations, &decoder)
                .context("Failed to decode annotations")?
            else {
                bail!("Service {namespace}/{name} has no autoneg annotations");
            };

            let intended = AutonegStatus {
                config: statuses.config.clone(),
                neg_status: if deleting {
                    Default::default()
                } else {
                    statuses.neg_status.clone()
                },
                sync: statuses.sync_config,
            };
            let plan = reconcile_status(&project, &statuses.status, &intended);

            let changes: Vec<_> = plan
                .pairs()
                .map(|(port, key, remove, upsert)| {
                    json!({
                        "port": port,
                        "backend_service": key,
                        "remove": {
                            "name": remove.name,
                            "region": remove.region,
                            "groups": remove.backends.iter().map(|b| b.group.as_str()).collect::<Vec<_>>(),
                        },
                        "upsert": {
                            "name": upsert.name,
                            "region": upsert.region,
                            "backends": upsert.backends,
                        },
                    })
                })
                .collect();
            let output = json!({
                "noop": plan.is_noop(),
                "changes": changes,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&output).context("Failed to render plan")?
            );
        }
    }

    Ok(())
}
