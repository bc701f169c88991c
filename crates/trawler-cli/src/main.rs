use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use trawler_client::{ReqwestTransport, SiteManifest};
use trawler_core::alert::{AlertManager, TracingAlertSink};
use trawler_core::config::CrawlConfig;
use trawler_core::registry::SpiderRegistry;
use trawler_core::request::RequestEngine;
use trawler_core::spider::SpiderContext;
use trawler_core::status::SpiderStatus;
use trawler_core::store::MemoryStore;
use trawler_core::supervisor::SpiderManager;
use trawler_core::traits::ItemStore;

#[derive(Parser)]
#[command(name = "trawler", version, about = "Concurrent spider runner for paginated sites")]
struct Cli {
    /// Path to the JSON site manifest
    #[arg(short, long, global = true, env = "TRAWLER_MANIFEST", default_value = "sites.json")]
    manifest: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl every site once, or a single spider
    Run {
        /// Only run this spider
        #[arg(short, long)]
        spider: Option<String>,

        /// Listing page to start from (single spider only)
        #[arg(long, requires = "spider")]
        start_page: Option<u32>,

        /// Write scraped items to this JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List spiders defined in the manifest
    List,

    /// Crawl every site on a fixed interval until Ctrl-C
    Schedule {
        /// Minutes between passes
        #[arg(long, default_value_t = 60)]
        every: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("trawler=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut registry = SpiderRegistry::new();
    SiteManifest::load(&cli.manifest)
        .with_context(|| format!("Failed to load manifest {}", cli.manifest.display()))?
        .register_into(&mut registry)?;

    match cli.command {
        Commands::List => cmd_list(&registry)?,
        Commands::Run {
            spider,
            start_page,
            output,
        } => {
            let (manager, store) = build_manager(&registry)?;
            cmd_run(&manager, spider.as_deref(), start_page).await?;
            if let Some(path) = output {
                export_items(&store, &path)?;
            }
        }
        Commands::Schedule { every } => {
            if every == 0 {
                anyhow::bail!("--every must be at least 1 minute");
            }
            let (manager, _store) = build_manager(&registry)?;
            cmd_schedule(&manager, Duration::from_secs(every * 60)).await?;
        }
    }

    Ok(())
}

/// Wire config, transport, store and alerts into a manager.
fn build_manager(registry: &SpiderRegistry) -> Result<(SpiderManager, Arc<MemoryStore>)> {
    let config = CrawlConfig::from_env().context("Invalid crawl configuration")?;

    let transport = ReqwestTransport::new().context("Failed to create HTTP client")?;
    let engine = Arc::new(RequestEngine::new(
        Arc::new(transport),
        config.request.clone(),
    ));
    let store = Arc::new(MemoryStore::new());
    let mut context = SpiderContext::new(engine)
        .with_store(Arc::clone(&store) as Arc<dyn ItemStore>)
        .with_batch_size(config.batch_size);
    if let Some(hint) = &config.parser_hint {
        context = context.with_parser_hint(hint);
    }

    let alerts = Arc::new(AlertManager::new());
    alerts.register(Arc::new(TracingAlertSink));

    let manager = SpiderManager::from_registry(registry, &context, &config, alerts)?;
    tracing::info!(spiders = manager.spiders().len(), "Spiders ready");
    Ok((manager, store))
}

fn cmd_list(registry: &SpiderRegistry) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&registry.listing())?);
    Ok(())
}

async fn cmd_run(manager: &SpiderManager, spider: Option<&str>, start_page: Option<u32>) -> Result<()> {
    let statuses = tokio::select! {
        result = run_once(manager, spider, start_page) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping spiders");
            manager.stop_all_spider().await
        }
    };
    print_statuses(&statuses)
}

async fn run_once(
    manager: &SpiderManager,
    spider: Option<&str>,
    start_page: Option<u32>,
) -> Result<Vec<SpiderStatus>> {
    match spider {
        Some(name) => {
            let status = manager.starter().start(name, start_page).await?;
            Ok(vec![status])
        }
        None => {
            let report = manager.start_full_parsing().await?;
            tracing::info!(new_items = report.new_items, skipped = report.skipped, "Parsing pass finished");
            Ok(report.statuses)
        }
    }
}

async fn cmd_schedule(manager: &SpiderManager, every: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        tracing::info!("Starting scheduled parsing pass");
        let pass = tokio::select! {
            result = manager.start_full_parsing() => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        };
        match pass {
            Some(Ok(report)) => {
                tracing::info!(new_items = report.new_items, skipped = report.skipped, "Scheduled pass finished");
            }
            Some(Err(e)) => tracing::error!(error = %e, "Scheduled pass failed"),
            None => break,
        }
    }

    tracing::warn!("Interrupted, stopping spiders");
    let statuses = manager.stop_all_spider().await;
    print_statuses(&statuses)
}

fn print_statuses(statuses: &[SpiderStatus]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(statuses)?);
    Ok(())
}

fn export_items(store: &MemoryStore, path: &Path) -> Result<()> {
    let items = store.items();
    let json = serde_json::to_string_pretty(&items)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write items to {}", path.display()))?;
    tracing::info!(count = items.len(), path = %path.display(), "Exported items");
    Ok(())
}
