//! nhl-stats-sync - Polite multi-source NHL statistics collector
//!
//! This is the command-line entry point: one-shot syncs, store statistics,
//! cache maintenance and a scheduled daemon mode.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use nhl_stats_sync::config::Config;
use nhl_stats_sync::database::{EntityStore, SqliteStore};
use nhl_stats_sync::logging::init_tracing;
use nhl_stats_sync::models::{EntityKind, Season, Source, SourceState, SyncScope};
use nhl_stats_sync::plugins::cache::{CachePlugin, FilesystemCache, FilesystemCacheConfig};
use nhl_stats_sync::sync::{
    cancel_pair, HttpTransport, OrchestratedSync, SyncOrchestrator, SyncScheduler,
};

/// nhl-stats-sync - Polite multi-source NHL statistics collector
#[derive(Parser, Debug)]
#[command(name = "nhl-stats-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "NHL_STATS_SYNC_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one sync and print the run report as JSON
    Sync {
        /// Sources to sync (nhl_api, moneypuck, hockey_ref, nst, elite); defaults to all runnable
        #[arg(short, long = "source", value_parser = parse_source)]
        sources: Vec<Source>,

        /// Season id such as 20232024; defaults to the current season
        #[arg(long, value_parser = parse_season)]
        season: Option<Season>,

        /// Player ids whose individual pages should be fetched
        #[arg(short, long = "player")]
        players: Vec<u32>,
    },

    /// Print persisted entity counts per kind
    Stats,

    /// Re-run syncs on a schedule until interrupted
    Daemon {
        /// Seconds between runs; overrides the configuration
        #[arg(long)]
        interval_secs: Option<u64>,

        /// Sources to sync; defaults to all runnable
        #[arg(short, long = "source", value_parser = parse_source)]
        sources: Vec<Source>,
    },

    /// Raw payload cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Remove cached payloads
    Purge {
        /// Only remove expired entries
        #[arg(long)]
        expired: bool,
    },
}

fn parse_source(s: &str) -> Result<Source, String> {
    s.parse()
}

fn parse_season(s: &str) -> Result<Season, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;
    init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting nhl-stats-sync"
    );

    match args.command {
        Command::Sync {
            sources,
            season,
            players,
        } => {
            let mut scope = SyncScope::new(season.unwrap_or_else(Season::current));
            scope = scope.with_players(players);
            run_sync(config, sources, scope).await
        }
        Command::Stats => print_stats(&config).await,
        Command::Daemon {
            interval_secs,
            sources,
        } => {
            let mut config = config;
            if let Some(interval) = interval_secs {
                anyhow::ensure!(interval > 0, "--interval-secs must be greater than zero");
                config.scheduler.interval_secs = interval;
            }
            run_daemon(config, sources).await
        }
        Command::Cache {
            action: CacheCommand::Purge { expired },
        } => purge_cache(&config, expired).await,
    }
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // tracing is not initialized yet
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

async fn build_orchestrator(config: Config) -> anyhow::Result<Arc<SyncOrchestrator>> {
    let transport = HttpTransport::new(&config.http).context("Failed to build HTTP client")?;

    let store = SqliteStore::new(&config.database.path)
        .await
        .context("Failed to open entity store")?;
    info!(path = %config.database.path, "Entity store opened");

    let cache = if config.cache.enabled {
        let cache = FilesystemCache::open(FilesystemCacheConfig::from(&config.cache))
            .await
            .context("Failed to open payload cache")?;
        info!(path = %cache.base_path().display(), "Payload cache enabled");
        Some(Arc::new(cache))
    } else {
        None
    };

    let mut orchestrator =
        SyncOrchestrator::new(Arc::new(config), Arc::new(transport), Arc::new(store));
    if let Some(cache) = cache {
        orchestrator = orchestrator.with_cache(cache);
    }

    Ok(Arc::new(orchestrator))
}

/// Requested sources, or every enabled source with a registered adapter
fn resolve_sources(orchestrator: &SyncOrchestrator, requested: Vec<Source>) -> Vec<Source> {
    if !requested.is_empty() {
        return requested;
    }

    let registered = orchestrator.registered_sources();
    orchestrator
        .config()
        .enabled_sources()
        .into_iter()
        .filter(|source| {
            let runnable = registered.contains(source);
            if !runnable {
                warn!(source = %source, "No parser available for source, skipping");
            }
            runnable
        })
        .collect()
}

async fn run_sync(config: Config, sources: Vec<Source>, scope: SyncScope) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let sources = resolve_sources(&orchestrator, sources);

    let (cancel, signal) = cancel_pair();
    let interrupt = tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    let result = orchestrator.sync(&sources, &scope, signal).await;
    interrupt.abort();
    let report = result?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    for source in &report.sources {
        match source.state {
            SourceState::Failed => error!(
                source = %source.source,
                error = source.error.as_deref().unwrap_or(""),
                "Source failed"
            ),
            state => info!(
                source = %source.source,
                state = ?state,
                committed = source.committed,
                "Source finished"
            ),
        }
    }

    if report.has_failures() {
        anyhow::bail!("one or more sources failed");
    }
    Ok(())
}

async fn print_stats(config: &Config) -> anyhow::Result<()> {
    let store = SqliteStore::new(&config.database.path)
        .await
        .context("Failed to open entity store")?;

    for kind in EntityKind::ALL {
        let count = store.count(kind).await?;
        println!("{:<22} {}", kind.as_str(), count);
    }
    Ok(())
}

async fn run_daemon(config: Config, sources: Vec<Source>) -> anyhow::Result<()> {
    let scheduler_config = config.scheduler.clone();
    let orchestrator = build_orchestrator(config).await?;
    let sources = resolve_sources(&orchestrator, sources);
    anyhow::ensure!(!sources.is_empty(), "no runnable sources configured");

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let job = Arc::new(OrchestratedSync::new(orchestrator, sources));
    let scheduler = SyncScheduler::new(scheduler_config, job, shutdown_rx);
    let status = scheduler.status_handle();
    let handle = tokio::spawn(scheduler.run());

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    if let Err(e) = handle.await {
        error!(error = %e, "Scheduler task aborted");
    }

    let status = status.read().await;
    info!(runs = status.runs, "nhl-stats-sync shutdown complete");
    Ok(())
}

async fn purge_cache(config: &Config, expired_only: bool) -> anyhow::Result<()> {
    let cache = FilesystemCache::open(FilesystemCacheConfig::from(&config.cache))
        .await
        .context("Failed to open payload cache")?;

    if expired_only {
        let removed = cache.purge_expired().await?;
        println!("Removed {} expired entries", removed);
    } else {
        cache.purge().await?;
        println!("Cache purged");
    }
    Ok(())
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
