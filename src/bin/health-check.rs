//! Source health sweep.
//!
//! Prints a per-source status table and exits 1 when any HIGH-severity issue exists.
//! With `--alert`, the formatted issue list is also sent through the alert gateway.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};

use listing_ingest::app::ports::AlertGateway;
use listing_ingest::config::AppConfig;
use listing_ingest::health::HealthMonitor;
use listing_ingest::infra::alert_webhook::gateway_from_config;
use listing_ingest::logging;
use listing_ingest::pipeline::storage::SqliteDatastore;

#[derive(Parser)]
#[command(name = "health-check")]
#[command(about = "Report stale, failing and silent listing sources")]
struct Args {
    /// Path to the TOML config (defaults to ./config.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also dispatch the issue list to the alert gateway
    #[arg(long)]
    alert: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    logging::init_logging();
    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref())?;

    let store = SqliteDatastore::open(&config.datastore.path)
        .with_context(|| format!("opening datastore at {}", config.datastore.path.display()))?;
    let monitor = HealthMonitor::from_settings(&config.registry, &config.health);
    let report = monitor.check(&store, chrono::Utc::now()).await?;

    println!("{}", report.render_table());

    if args.alert {
        match report.alert_message() {
            Some(message) => {
                let gateway = gateway_from_config(config.alert.webhook_url.as_deref());
                if gateway.send(&message).await {
                    info!("Health alert dispatched");
                } else {
                    warn!("Health alert could not be delivered");
                }
            }
            None => info!("No issues, nothing to alert"),
        }
    }

    if report.has_high() {
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
