//! siteplan-expansion - Retail expansion candidate service
//!
//! Accepts expansion jobs over HTTP, runs them in the background and serves
//! status, results and an SSE event stream.

use anyhow::{Context, Result};
use clap::Parser;
use siteplan_common::events::EventBus;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use siteplan_expansion::config::ExpansionConfig;
use siteplan_expansion::db::cache::SqliteCacheStore;
use siteplan_expansion::db::sites::SqliteStoreRegistry;
use siteplan_expansion::services::{
    Collaborators, FileRegionProvider, HttpRationaleProvider, JobOrchestrator, NoRouting,
    ResultCache,
};
use siteplan_expansion::AppState;

#[derive(Debug, Parser)]
#[command(name = "siteplan-expansion", version, about = "Retail expansion candidate service")]
struct Args {
    /// Config file (overrides SITEPLAN_CONFIG and the platform config dir)
    #[arg(long, env = "SITEPLAN_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address (overrides the config file)
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("Starting siteplan-expansion");
    info!(
        "Version: {} ({}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE")
    );

    let mut config = ExpansionConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    let config = Arc::new(config);

    info!("Database: {}", config.server.database_path.display());
    let db_pool = siteplan_expansion::db::init_database_pool(&config.server.database_path)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    let event_bus = EventBus::new(config.server.event_capacity);

    let rationale = HttpRationaleProvider::new(&config.enhancement)
        .context("Failed to build AI rationale client")?;
    let cache_store = Arc::new(SqliteCacheStore::new(
        db_pool.clone(),
        config.jobs.db_lock_wait_ms,
    ));

    match ResultCache::new(cache_store.clone(), config.cache.ttl_days)
        .purge_expired()
        .await
    {
        Ok(purged) => info!(purged, "Expired rationale cache entries removed"),
        Err(e) => warn!(error = %e, "Failed to purge expired rationale cache entries"),
    }

    let collaborators = Collaborators {
        regions: Arc::new(FileRegionProvider::new(config.server.data_dir.clone())),
        stores: Arc::new(SqliteStoreRegistry::new(db_pool.clone())),
        routing: Arc::new(NoRouting),
        rationale: Arc::new(rationale),
        cache_store,
    };
    let orchestrator = Arc::new(JobOrchestrator::new(
        db_pool.clone(),
        event_bus,
        config.clone(),
        collaborators,
    ));

    let report = orchestrator
        .recover_stale_jobs()
        .await
        .context("Failed to recover interrupted jobs")?;
    info!(
        resumed = report.resumed,
        failed = report.failed,
        requeued = report.requeued,
        "Startup job recovery complete"
    );

    // Later sweeps catch jobs that go stale while this process runs
    let sweeper = orchestrator.clone();
    let sweep_every = Duration::from_secs(config.jobs.staleness_threshold_secs.max(60));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.recover_stale_jobs().await {
                warn!(error = %e, "Stale job sweep failed");
            }
        }
    });

    let state = AppState::new(db_pool, orchestrator);
    let app = siteplan_expansion::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!("Listening on http://{}", config.server.bind);
    info!("Health check: http://{}/health", config.server.bind);

    axum::serve(listener, app).await?;

    Ok(())
}
