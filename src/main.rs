//! ingress-sync controller
//!
//! Watches Ingress, Service, EndpointSlice, Secret and ConfigMap objects
//! and keeps a reverse proxy's configuration converged with them.
//!
//! # Architecture Overview
//!
//! ```text
//!   cluster API                                                    proxy
//!  ┌──────────┐   ┌───────┐   ┌───────────┐   ┌────────────┐   ┌──────────┐
//!  │ watches  │──▶│ store │──▶│ sync queue│──▶│ reconciler │──▶│ control  │
//!  └──────────┘   └───────┘   └───────────┘   └─────┬──────┘   │ channel  │
//!                                                   │          └──────────┘
//!                                  translate ◀──────┤          ┌──────────┐
//!                                  detect    ◀──────┤          │ config + │
//!                                  apply     ───────┴─────────▶│ reload   │
//!                                                              └──────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use ingress_sync::config::{load_config, ControllerConfig};
use ingress_sync::lifecycle;
use ingress_sync::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "ingress-sync")]
#[command(about = "Ingress controller for a reverse proxy", long_about = None)]
#[command(version)]
struct Args {
    /// TOML configuration file; watched for changes.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured log level.
    #[arg(long)]
    log_level: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ControllerConfig::default(),
    };

    let level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    logging::init_logging(level, config.observability.log_json);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "ingress-sync starting");
    tracing::info!(
        class = %config.ingress.class,
        namespace = config.ingress.namespace.as_deref().unwrap_or("<all>"),
        config_path = %config.proxy.config_path.display(),
        debounce_ms = config.sync.debounce_ms,
        "Configuration loaded"
    );

    if args.check {
        println!("configuration ok");
        return Ok(());
    }

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    lifecycle::run(config, args.config).await?;
    Ok(())
}
