//! Harness Utilities
//!
//! Temporary database, orchestrator wiring and job polling

use anyhow::{bail, Result};
use siteplan_common::events::EventBus;
use siteplan_expansion::config::ExpansionConfig;
use siteplan_expansion::db::cache::SqliteCacheStore;
use siteplan_expansion::db::init_database_pool;
use siteplan_expansion::db::sites::SqliteStoreRegistry;
use siteplan_expansion::models::{Job, JobStage};
use siteplan_expansion::services::{Collaborators, JobOrchestrator, NoRouting, SubmitRequest};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use super::fakes::{ScriptedRationaleProvider, StaticRegionProvider};
use super::fixtures::{small_country, SMALL_COUNTRY};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const POLL_TIMEOUT: Duration = Duration::from_secs(20);

/// Orchestrator over a temporary database
///
/// Keep the harness alive for the whole test; dropping it removes the
/// database directory.
pub struct TestHarness {
    pub temp_dir: TempDir,
    pub pool: SqlitePool,
    pub orchestrator: Arc<JobOrchestrator>,
    pub provider: Arc<ScriptedRationaleProvider>,
    pub config: ExpansionConfig,
}

/// Defaults with short lock waits and call timeouts
pub fn test_config() -> ExpansionConfig {
    let mut config = ExpansionConfig::default();
    config.jobs.db_lock_wait_ms = 2000;
    config.enhancement.call_timeout_secs = 5;
    config.rate_limit.max_retry_wait_ms = 200;
    config
}

pub async fn build_harness(
    provider: ScriptedRationaleProvider,
    config: ExpansionConfig,
) -> Result<TestHarness> {
    let temp_dir = TempDir::new()?;
    let pool = init_database_pool(&temp_dir.path().join("test_siteplan.db")).await?;
    let provider = Arc::new(provider);
    let orchestrator = orchestrator_on(pool.clone(), provider.clone(), config.clone());

    Ok(TestHarness {
        temp_dir,
        pool,
        orchestrator,
        provider,
        config,
    })
}

/// Orchestrator wired to an existing pool (a "restarted" process)
pub fn orchestrator_on(
    pool: SqlitePool,
    provider: Arc<ScriptedRationaleProvider>,
    config: ExpansionConfig,
) -> Arc<JobOrchestrator> {
    let lock_wait_ms = config.jobs.db_lock_wait_ms;
    let collaborators = Collaborators {
        regions: Arc::new(StaticRegionProvider::new(vec![small_country()])),
        stores: Arc::new(SqliteStoreRegistry::new(pool.clone())),
        routing: Arc::new(NoRouting),
        rationale: provider,
        cache_store: Arc::new(SqliteCacheStore::new(pool.clone(), lock_wait_ms)),
    };
    Arc::new(JobOrchestrator::new(
        pool,
        EventBus::new(256),
        Arc::new(config),
        collaborators,
    ))
}

/// Submission against the small-country fixture
pub fn submit_request(target_count: usize, ai_fraction: f64) -> SubmitRequest {
    SubmitRequest {
        region_key: SMALL_COUNTRY.to_string(),
        target_count: Some(target_count),
        ai_fraction: Some(ai_fraction),
        ..Default::default()
    }
}

/// Poll until the job reaches a terminal status
pub async fn wait_for_terminal(orchestrator: &JobOrchestrator, job_id: Uuid) -> Result<Job> {
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    loop {
        let job = orchestrator.status(job_id).await?;
        if job.is_terminal() {
            return Ok(job);
        }
        if tokio::time::Instant::now() >= deadline {
            bail!(
                "job {} still {} at stage {} after {:?}",
                job_id,
                job.status.as_str(),
                job.progress.stage.as_str(),
                POLL_TIMEOUT
            );
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Poll until the job has entered `stage` (or finished)
pub async fn wait_for_stage(
    orchestrator: &JobOrchestrator,
    job_id: Uuid,
    stage: JobStage,
) -> Result<Job> {
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    loop {
        let job = orchestrator.status(job_id).await?;
        if job.progress.stage >= stage || job.is_terminal() {
            return Ok(job);
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("job {} never reached stage {}", job_id, stage.as_str());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
