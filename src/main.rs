use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use listing_ingest::app::ports::{FetchOptions, PageFetcher};
use listing_ingest::clock::{Clock, SystemClock};
use listing_ingest::config::AppConfig;
use listing_ingest::infra::alert_webhook::gateway_from_config;
use listing_ingest::infra::http_client::ReqwestPageFetcher;
use listing_ingest::infra::llm_client::ChatCompletionsModel;
use listing_ingest::logging;
use listing_ingest::observability;
use listing_ingest::pipeline::processing::providers::ProviderDetector;
use listing_ingest::pipeline::storage::{Datastore, SqliteDatastore};
use listing_ingest::pipeline::{IngestPipeline, RunSummary};
use listing_ingest::registry::SourceRegistry;

#[derive(Parser)]
#[command(name = "listing_ingest")]
#[command(about = "Verified ingestion of class and event listings from studio websites")]
#[command(version)]
struct Cli {
    /// Path to the TOML config (defaults to ./config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion pipeline over active sources
    Run {
        /// Only these source ids (comma-separated)
        #[arg(long)]
        sources: Option<String>,
    },
    /// Detect booking providers on one page
    Detect {
        #[arg(long)]
        url: String,
        /// Business name used when registering discovered sources
        #[arg(long)]
        name: Option<String>,
        /// Register newly found provider identifiers as unverified sources
        #[arg(long)]
        register: bool,
    },
    /// Import hand-curated source definitions (*.json)
    ImportSources {
        #[arg(long, default_value = "registry/sources")]
        dir: PathBuf,
    },
    /// List registered sources
    Sources,
}

fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn Datastore>> {
    let store = SqliteDatastore::open(&config.datastore.path)
        .with_context(|| format!("opening datastore at {}", config.datastore.path.display()))?;
    Ok(Arc::new(store))
}

fn fetcher(config: &AppConfig) -> anyhow::Result<Arc<dyn PageFetcher>> {
    let fetcher = ReqwestPageFetcher::new(
        config.pipeline.fetch_retries,
        Duration::from_millis(config.pipeline.retry_base_delay_ms),
    )?;
    Ok(Arc::new(fetcher))
}

fn print_run_summary(summary: &RunSummary) {
    println!("\n📊 Run {} results:", summary.run_id);
    println!("   Sources: {}", summary.sources_total);
    println!("   Succeeded: {}", summary.succeeded);
    println!("   Failed: {}", summary.failed);
    println!("   Inserted: {}", summary.inserted);
    println!("   Duplicates skipped: {}", summary.duplicates);
    println!("   Replaced: {}", summary.removed);
    println!("   Candidates rejected: {}", summary.rejected);

    if !summary.failures.is_empty() {
        println!("\n⚠️  Failures:");
        for failure in &summary.failures {
            let flag = if failure.threshold_crossed { " (alerted)" } else { "" };
            println!("   - {} [{}]{}: {}", failure.source_id, failure.kind, flag, failure.error);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    observability::init_metrics()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let alerts = gateway_from_config(config.alert.webhook_url.as_deref());

    match cli.command {
        Commands::Run { sources } => {
            println!("🚀 Running ingestion pipeline...");
            let store = open_store(&config)?;
            let model = Arc::new(ChatCompletionsModel::new(config.extractor_api_key()?, &config.extractor));
            let pipeline = Arc::new(IngestPipeline::new(
                &config,
                fetcher(&config)?,
                model,
                store,
                alerts,
                clock,
            )?);

            let mut selected = pipeline.registry().active_sources().await?;
            if let Some(ids) = sources {
                let wanted: Vec<&str> = ids.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
                selected.retain(|s| wanted.contains(&s.id.as_str()));
                if selected.is_empty() {
                    bail!("none of the requested sources are registered and active: {}", ids);
                }
            }
            if selected.is_empty() {
                println!("⚠️  No active sources registered. Run `import-sources` first.");
                return Ok(());
            }

            match pipeline.run(selected).await {
                Ok(summary) => {
                    info!("Run finished");
                    print_run_summary(&summary);
                }
                Err(e) => {
                    error!("Run aborted: {}", e);
                    println!("❌ Run aborted: {}", e);
                    return Err(e.into());
                }
            }
        }
        Commands::Detect { url, name, register } => {
            println!("🔍 Detecting booking providers on {}", url);
            let options = FetchOptions::with_timeout(Duration::from_secs(config.pipeline.fetch_timeout_secs));
            let page = fetcher(&config)?.fetch(&url, &options).await?;
            let matches = ProviderDetector::default().detect(&page.html, &page.url);

            if matches.is_empty() {
                println!("   No known provider found");
            }
            for m in &matches {
                println!(
                    "   {:<16} id={:<24} priority={}",
                    m.system_key,
                    m.extracted_id.as_deref().unwrap_or("-"),
                    m.priority
                );
            }

            if register {
                let registry = SourceRegistry::new(open_store(&config)?, alerts, clock, config.registry.failure_threshold);
                let business = name.unwrap_or_else(|| url.clone());
                let created = registry.discover(&business, &url, &matches).await?;
                println!("✅ Registered {} new source(s)", created.len());
                for source in created {
                    println!("   - {}", source.id);
                }
            }
        }
        Commands::ImportSources { dir } => {
            println!("📥 Importing sources from {}", dir.display());
            let registry = SourceRegistry::new(open_store(&config)?, alerts, clock, config.registry.failure_threshold);
            let imported = registry.import_dir(&dir).await?;
            println!("✅ Imported {} source(s)", imported);
        }
        Commands::Sources => {
            let store = open_store(&config)?;
            let sources = store.list_sources().await?;
            println!(
                "{:<32} {:<28} {:<16} {:>8} {:>8} {:>6}",
                "ID", "NAME", "SYSTEM", "ACTIVE", "VERIFIED", "FAILS"
            );
            for s in &sources {
                println!(
                    "{:<32} {:<28} {:<16} {:>8} {:>8} {:>6}",
                    s.id,
                    s.name,
                    s.booking_system.as_deref().unwrap_or("-"),
                    s.is_active,
                    s.verified,
                    s.consecutive_failures
                );
            }
            println!("\n{} source(s)", sources.len());
        }
    }
    Ok(())
}
