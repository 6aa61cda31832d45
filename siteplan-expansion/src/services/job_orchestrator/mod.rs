//! Expansion job orchestrator
//!
//! Runs expansion jobs as background work and owns their lifecycle.
//!
//! # Stage progression
//! GENERATING → SCORING → DEDUPLICATING → ENHANCING → FINALIZING
//!
//! Each stage lives in its own `phase_*` module. A stage's output is stored
//! as a checkpoint before the job moves on, so a job interrupted by a
//! restart resumes from the stage after its last checkpoint.
//!
//! # Concurrency
//! - At most `jobs.max_concurrent_jobs` jobs execute at once; the rest wait
//!   queued.
//! - One [`AiDispatchLimiter`] is shared by every job, so the global call
//!   caps hold across jobs.
//! - Every job has a [`CancellationToken`]. Cancelling stops new work; AI
//!   calls already in flight finish.
//!
//! # Idempotency
//! The `jobs` table has a unique index over the idempotency key of active
//! (queued or running) jobs. A submission that collides with it returns the
//! active job instead of creating a second one.

mod phase_deduplicating;
mod phase_enhancing;
mod phase_generating;
mod phase_scoring;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use siteplan_common::events::{EventBus, ExpansionEvent};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ExpansionConfig;
use crate::db;
use crate::db::jobs::InsertOutcome;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    Aggression, CostCaps, DedupOutcome, ExclusionSite, Job, JobParams, JobResult, JobStage,
    JobStatus, RunMetadata, SiteKind,
};
use crate::services::cost_tiered_enhancer::{deterministic_suggestion, CostTieredEnhancer, EnhancementOutcome};
use crate::services::providers::{DriveTimeModel, RegionDataProvider, StoreRegistry};
use crate::services::rate_limiter::AiDispatchLimiter;
use crate::services::rationale_provider::RationaleProvider;
use crate::services::result_cache::{CacheStore, ResultCache};

/// Upper bound on a job's target count
pub const MAX_TARGET_COUNT: usize = 1000;

/// External collaborators the orchestrator reads from
#[derive(Clone)]
pub struct Collaborators {
    pub regions: Arc<dyn RegionDataProvider>,
    pub stores: Arc<dyn StoreRegistry>,
    pub routing: Arc<dyn DriveTimeModel>,
    pub rationale: Arc<dyn RationaleProvider>,
    pub cache_store: Arc<dyn CacheStore>,
}

/// Job submission
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub region_key: String,
    /// Explicit target; wins over `aggression`
    #[serde(default)]
    pub target_count: Option<usize>,
    #[serde(default)]
    pub aggression: Option<Aggression>,
    #[serde(default)]
    pub ai_enabled: Option<bool>,
    #[serde(default)]
    pub ai_fraction: Option<f64>,
    #[serde(default)]
    pub job_cost_cap: Option<f64>,
    #[serde(default)]
    pub ai_hard_cap: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub job: Job,
    /// False when an active job with the same idempotency key was returned
    pub created: bool,
}

/// What `result` can hand back for a job
#[derive(Debug, Clone)]
pub enum ResultAvailability {
    /// Job finished; this is its stored result
    Final(JobResult),
    /// Job still running with survivors known; rationale is deterministic
    Provisional(JobResult),
    NotReady(Job),
}

#[derive(Debug, Clone)]
pub enum RetryOutcome {
    Requeued(Job),
    /// Only failed jobs marked retryable can be retried
    NotRetryable(Job),
    /// Another active job holds the idempotency key
    KeyInUse(Job),
}

#[derive(Debug, Clone)]
pub struct PromoteOutcome {
    pub site: ExclusionSite,
    /// False when the suggestion was already promoted
    pub created: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Stale running jobs re-queued from their checkpoint
    pub resumed: usize,
    /// Stale running jobs without a checkpoint, marked failed
    pub failed: usize,
    /// Queued jobs re-dispatched
    pub requeued: usize,
}

pub struct JobOrchestrator {
    db: SqlitePool,
    event_bus: EventBus,
    config: Arc<ExpansionConfig>,
    regions: Arc<dyn RegionDataProvider>,
    stores: Arc<dyn StoreRegistry>,
    routing: Arc<dyn DriveTimeModel>,
    enhancer: Arc<CostTieredEnhancer>,
    job_slots: Arc<Semaphore>,
    /// Live job tasks, tagged with the dispatch that owns the entry
    cancellation_tokens: Arc<RwLock<HashMap<Uuid, (u64, CancellationToken)>>>,
    dispatch_seq: AtomicU64,
}

impl JobOrchestrator {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        config: Arc<ExpansionConfig>,
        collaborators: Collaborators,
    ) -> Self {
        let cache = ResultCache::new(collaborators.cache_store, config.cache.ttl_days);
        let limiter = Arc::new(AiDispatchLimiter::new(&config.rate_limit));
        let enhancer = Arc::new(CostTieredEnhancer::new(
            collaborators.rationale,
            cache,
            limiter,
            config.enhancement.clone(),
            &config.cache,
        ));

        Self {
            db,
            event_bus,
            job_slots: Arc::new(Semaphore::new(config.jobs.max_concurrent_jobs.max(1))),
            config,
            regions: collaborators.regions,
            stores: collaborators.stores,
            routing: collaborators.routing,
            enhancer,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            dispatch_seq: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ExpansionConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Resolve a submission against configured defaults and validate it
    pub fn resolve_params(&self, request: &SubmitRequest) -> PipelineResult<JobParams> {
        let region_key = request.region_key.trim();
        if region_key.is_empty() {
            return Err(PipelineError::InvalidParams("region_key is required".to_string()));
        }

        let target_count = request
            .target_count
            .or_else(|| request.aggression.map(|a| a.target_count()))
            .unwrap_or_else(|| Aggression::Balanced.target_count());
        if target_count == 0 || target_count > MAX_TARGET_COUNT {
            return Err(PipelineError::InvalidParams(format!(
                "target_count must be between 1 and {}",
                MAX_TARGET_COUNT
            )));
        }

        let ai_fraction = request
            .ai_fraction
            .unwrap_or(self.config.enhancement.default_ai_fraction);
        if !(0.0..=1.0).contains(&ai_fraction) {
            return Err(PipelineError::InvalidParams(
                "ai_fraction must be within [0, 1]".to_string(),
            ));
        }

        let job_cost_cap = request
            .job_cost_cap
            .unwrap_or(self.config.cost.default_job_cost_cap);
        if !job_cost_cap.is_finite() || job_cost_cap < 0.0 {
            return Err(PipelineError::InvalidParams(
                "job_cost_cap must be a non-negative number".to_string(),
            ));
        }

        let ai_hard_cap = request
            .ai_hard_cap
            .unwrap_or(self.config.enhancement.ai_hard_cap)
            .min(self.config.enhancement.ai_hard_cap);

        Ok(JobParams {
            region_key: region_key.to_string(),
            target_count,
            ai_enabled: request.ai_enabled.unwrap_or(true),
            ai_fraction,
            cost_caps: CostCaps {
                job_cost_cap,
                ai_hard_cap,
            },
            seed: request.seed.unwrap_or(self.config.jobs.default_seed),
        })
    }

    /// Create and dispatch a job, or return the active job holding the key
    pub async fn submit(self: &Arc<Self>, request: SubmitRequest) -> PipelineResult<SubmitOutcome> {
        let params = self.resolve_params(&request)?;
        let idempotency_key = request
            .idempotency_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        if let Some(key) = &idempotency_key {
            if let Some(existing) = db::jobs::find_active_by_idempotency_key(&self.db, key).await? {
                info!(job_id = %existing.job_id, idempotency_key = %key, "Returning existing job for idempotency key");
                return Ok(SubmitOutcome {
                    job: existing,
                    created: false,
                });
            }
        }

        let job = Job::new(params, idempotency_key.clone());
        match db::jobs::insert_job(&self.db, &job).await? {
            InsertOutcome::Inserted => {}
            InsertOutcome::DuplicateActiveKey => {
                // Lost a race with a concurrent submission
                let key = idempotency_key.unwrap_or_default();
                let existing = db::jobs::find_active_by_idempotency_key(&self.db, &key)
                    .await?
                    .ok_or_else(|| {
                        siteplan_common::Error::Internal(format!(
                            "idempotency key {} collided but no active job holds it",
                            key
                        ))
                    })?;
                return Ok(SubmitOutcome {
                    job: existing,
                    created: false,
                });
            }
        }

        info!(
            job_id = %job.job_id,
            region = %job.params.region_key,
            target_count = job.params.target_count,
            ai_enabled = job.params.ai_enabled,
            cost_cap = job.params.cost_caps.job_cost_cap,
            "Job queued"
        );
        self.event_bus.emit_lossy(ExpansionEvent::JobQueued {
            job_id: job.job_id,
            region_key: job.params.region_key.clone(),
            target_count: job.params.target_count,
            timestamp: Utc::now(),
        });

        self.dispatch(job.job_id).await;
        Ok(SubmitOutcome { job, created: true })
    }

    /// Spawn the background task that runs a queued job
    async fn dispatch(self: &Arc<Self>, job_id: Uuid) {
        let token = CancellationToken::new();
        let dispatch = self.dispatch_seq.fetch_add(1, Ordering::Relaxed);
        self.cancellation_tokens
            .write()
            .await
            .insert(job_id, (dispatch, token.clone()));

        let this = self.clone();
        tokio::spawn(async move {
            let slot = tokio::select! {
                permit = this.job_slots.clone().acquire_owned() => permit.ok(),
                _ = token.cancelled() => None,
            };

            let outcome = match slot {
                Some(_slot) => this.run_job(job_id, &token).await,
                None => this.cancel_queued(job_id).await,
            };
            if let Err(e) = outcome {
                error!(job_id = %job_id, error = %e, "Job task failed");
            }

            // A retry may already have dispatched this job again
            let mut tokens = this.cancellation_tokens.write().await;
            if tokens.get(&job_id).map(|(owner, _)| *owner) == Some(dispatch) {
                tokens.remove(&job_id);
            }
        });
    }

    async fn run_job(&self, job_id: Uuid, cancel: &CancellationToken) -> PipelineResult<()> {
        let Some(mut job) = db::jobs::load_job(&self.db, job_id).await? else {
            warn!(job_id = %job_id, "Dispatched job no longer exists");
            return Ok(());
        };
        if job.is_terminal() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return self.finish_cancelled(&mut job).await;
        }

        job.transition_to(JobStatus::Running);
        db::jobs::save_job(&self.db, &job).await?;
        info!(
            job_id = %job.job_id,
            region = %job.params.region_key,
            resume_after = ?job.checkpoint,
            "Job started"
        );

        match self.execute(&mut job, cancel).await {
            Ok(()) => Ok(()),
            Err(PipelineError::Cancelled) => self.finish_cancelled(&mut job).await,
            Err(e) => self.finish_failed(&mut job, e).await,
        }
    }

    /// Run every stage not covered by the job's checkpoint
    async fn execute(&self, job: &mut Job, cancel: &CancellationToken) -> PipelineResult<()> {
        job.flags.clear();

        let exclusion = self.stores.exclusion_sites(&job.params.region_key).await?;

        let generation = self.phase_generating(job, &exclusion, cancel).await?;
        let scored = self.phase_scoring(job, &generation, &exclusion, cancel).await?;
        let dedup = self.phase_deduplicating(job, scored, &exclusion, cancel).await?;
        let enhancement = self.phase_enhancing(job, &dedup, cancel).await?;

        self.finalize(job, generation.candidates.len(), &dedup, enhancement)
            .await
    }

    async fn finalize(
        &self,
        job: &mut Job,
        total_candidates: usize,
        dedup: &DedupOutcome,
        enhancement: EnhancementOutcome,
    ) -> PipelineResult<()> {
        self.enter_stage(job, JobStage::Finalizing, "Assembling results").await?;

        let status = job.status_from_flags();
        let ai_tier_count = enhancement.ai_count();
        let metadata = RunMetadata {
            total_candidates,
            survivor_count: enhancement.suggestions.len(),
            suppressed_count: dedup.suppressed.len(),
            intended_ai_tier: enhancement.intended_ai_tier,
            ai_tier_count,
            deterministic_count: enhancement.suggestions.len() - ai_tier_count,
            total_cost: job.cost_accumulated,
            demoted_count: job.demoted_count,
            cache_hits: enhancement.cache_hits,
            ai_failures: enhancement.ai_failures,
            elapsed_ms: job.elapsed_ms(),
            flags: job.flags.clone(),
        };
        let result = JobResult {
            job_id: job.job_id,
            status,
            suggestions: enhancement.suggestions,
            metadata,
        };
        db::results::save_result(&self.db, &result, self.config.jobs.db_lock_wait_ms).await?;

        job.progress.advance(JobStage::Finalizing.progress_span().1);
        job.progress.stage = JobStage::Done;
        job.progress.current_operation = format!("Finished ({})", status.as_str());
        job.partial_results_available = true;
        job.transition_to(status);
        db::jobs::save_job(&self.db, job).await?;

        if let Err(e) = db::checkpoints::delete_checkpoints(&self.db, job.job_id).await {
            warn!(job_id = %job.job_id, error = %e, "Failed to delete stage checkpoints");
        }

        info!(
            job_id = %job.job_id,
            status = status.as_str(),
            survivors = result.metadata.survivor_count,
            ai_tier = result.metadata.ai_tier_count,
            demoted = result.metadata.demoted_count,
            total_cost = result.metadata.total_cost,
            elapsed_ms = result.metadata.elapsed_ms,
            "Job finished"
        );
        self.emit_finished(job, result.metadata.survivor_count);
        Ok(())
    }

    async fn finish_cancelled(&self, job: &mut Job) -> PipelineResult<()> {
        job.progress.current_operation = "Cancelled".to_string();
        job.transition_to(JobStatus::Cancelled);
        db::jobs::save_job(&self.db, job).await?;
        info!(job_id = %job.job_id, checkpoint = ?job.checkpoint, "Job cancelled");
        self.emit_finished(job, 0);
        Ok(())
    }

    async fn finish_failed(&self, job: &mut Job, err: PipelineError) -> PipelineResult<()> {
        error!(
            job_id = %job.job_id,
            error = %err,
            fatal = err.is_fatal(),
            "Job failed"
        );
        job.error = Some(err.to_string());
        job.retryable = err.is_retryable();
        job.progress.current_operation = "Failed".to_string();
        job.transition_to(JobStatus::Failed);
        db::jobs::save_job(&self.db, job).await?;
        self.emit_finished(job, 0);
        Ok(())
    }

    /// Job cancelled while waiting for an execution slot
    async fn cancel_queued(&self, job_id: Uuid) -> PipelineResult<()> {
        match db::jobs::load_job(&self.db, job_id).await? {
            Some(mut job) if !job.is_terminal() => self.finish_cancelled(&mut job).await,
            _ => Ok(()),
        }
    }

    fn emit_finished(&self, job: &Job, survivor_count: usize) {
        self.event_bus.emit_lossy(ExpansionEvent::JobFinished {
            job_id: job.job_id,
            status: job.status.as_str().to_string(),
            survivor_count,
            total_cost: job.cost_accumulated,
            timestamp: Utc::now(),
        });
    }

    /// Enter a stage, persist the job and announce the transition
    async fn enter_stage(
        &self,
        job: &mut Job,
        stage: JobStage,
        operation: &str,
    ) -> PipelineResult<()> {
        job.enter_stage(stage, operation);
        db::jobs::save_job(&self.db, job).await?;
        info!(job_id = %job.job_id, stage = ?stage, "Stage started");

        self.event_bus.emit_lossy(ExpansionEvent::JobStageChanged {
            job_id: job.job_id,
            stage: stage.as_str().to_string(),
            timestamp: Utc::now(),
        });
        self.emit_progress(job);
        Ok(())
    }

    /// Store a stage's output, then record it as the job's checkpoint
    async fn complete_stage<T: Serialize>(
        &self,
        job: &mut Job,
        stage: JobStage,
        output: &T,
    ) -> PipelineResult<()> {
        db::checkpoints::save_checkpoint(
            &self.db,
            job.job_id,
            stage,
            output,
            self.config.jobs.db_lock_wait_ms,
        )
        .await?;
        job.complete_stage(stage);
        db::jobs::save_job(&self.db, job).await?;
        self.emit_progress(job);
        Ok(())
    }

    /// Stored output of `stage` if the job already completed it
    async fn resume_from<T: serde::de::DeserializeOwned>(
        &self,
        job: &Job,
        stage: JobStage,
    ) -> PipelineResult<Option<T>> {
        if job.checkpoint.map_or(true, |done| done < stage) {
            return Ok(None);
        }
        let stored = db::checkpoints::load_checkpoint(&self.db, job.job_id, stage).await?;
        match &stored {
            Some(_) => info!(job_id = %job.job_id, stage = ?stage, "Resuming from checkpoint"),
            None => warn!(job_id = %job.job_id, stage = ?stage, "Checkpoint missing, recomputing stage"),
        }
        Ok(stored)
    }

    fn emit_progress(&self, job: &Job) {
        self.event_bus.emit_lossy(ExpansionEvent::JobProgress {
            job_id: job.job_id,
            stage: job.progress.stage.as_str().to_string(),
            progress: job.progress.counter,
            timestamp: Utc::now(),
        });
    }

    /// Current job state
    pub async fn status(&self, job_id: Uuid) -> PipelineResult<Job> {
        db::jobs::load_job(&self.db, job_id)
            .await?
            .ok_or_else(|| job_not_found(job_id))
    }

    /// Final result, or provisional survivors while enhancement runs
    pub async fn result(&self, job_id: Uuid) -> PipelineResult<ResultAvailability> {
        let job = self.status(job_id).await?;

        if let Some(result) = db::results::load_result(&self.db, job_id).await? {
            return Ok(ResultAvailability::Final(result));
        }

        if !job.is_terminal() && job.partial_results_available {
            let dedup: Option<DedupOutcome> =
                db::checkpoints::load_checkpoint(&self.db, job_id, JobStage::Deduplicating).await?;
            if let Some(dedup) = dedup {
                let suggestions: Vec<_> = dedup
                    .survivors
                    .into_iter()
                    .map(|s| deterministic_suggestion(s, None))
                    .collect();
                let metadata = RunMetadata {
                    survivor_count: suggestions.len(),
                    suppressed_count: dedup.suppressed.len(),
                    deterministic_count: suggestions.len(),
                    total_cost: job.cost_accumulated,
                    demoted_count: job.demoted_count,
                    elapsed_ms: job.elapsed_ms(),
                    flags: job.flags.clone(),
                    ..Default::default()
                };
                return Ok(ResultAvailability::Provisional(JobResult {
                    job_id,
                    status: job.status,
                    suggestions,
                    metadata,
                }));
            }
        }

        Ok(ResultAvailability::NotReady(job))
    }

    /// Signal a job to stop; terminal jobs are returned unchanged
    pub async fn cancel(&self, job_id: Uuid) -> PipelineResult<Job> {
        let mut job = self.status(job_id).await?;
        if job.is_terminal() {
            return Ok(job);
        }

        let token = self
            .cancellation_tokens
            .read()
            .await
            .get(&job_id)
            .map(|(_, token)| token.clone());
        match token {
            Some(token) => {
                info!(job_id = %job_id, "Cancellation requested");
                token.cancel();
            }
            None => {
                // No live task in this process
                self.finish_cancelled(&mut job).await?;
            }
        }
        Ok(job)
    }

    /// Re-queue a failed, retryable job; it resumes from its checkpoint
    pub async fn retry(self: &Arc<Self>, job_id: Uuid) -> PipelineResult<RetryOutcome> {
        let mut job = self.status(job_id).await?;
        if job.status != JobStatus::Failed || !job.retryable {
            return Ok(RetryOutcome::NotRetryable(job));
        }

        if let Some(key) = &job.idempotency_key {
            if let Some(active) = db::jobs::find_active_by_idempotency_key(&self.db, key).await? {
                return Ok(RetryOutcome::KeyInUse(active));
            }
        }

        job.error = None;
        job.retryable = false;
        job.progress.current_operation = "Queued for retry".to_string();
        job.transition_to(JobStatus::Queued);
        db::jobs::save_job(&self.db, &job).await?;
        info!(job_id = %job_id, checkpoint = ?job.checkpoint, "Job re-queued for retry");

        self.dispatch(job_id).await;
        Ok(RetryOutcome::Requeued(job))
    }

    /// Resume or fail running jobs abandoned by an earlier process
    ///
    /// Jobs with a live task in this process are left alone.
    pub async fn recover_stale_jobs(self: &Arc<Self>) -> PipelineResult<RecoveryReport> {
        let threshold =
            Utc::now() - chrono::Duration::seconds(self.config.jobs.staleness_threshold_secs as i64);
        let mut report = RecoveryReport::default();

        for mut job in db::jobs::list_stale_running(&self.db, threshold).await? {
            if self.is_live(job.job_id).await {
                continue;
            }

            if job.checkpoint.is_some() {
                job.progress.current_operation = "Resuming after restart".to_string();
                job.transition_to(JobStatus::Queued);
                db::jobs::save_job(&self.db, &job).await?;
                warn!(job_id = %job.job_id, checkpoint = ?job.checkpoint, "Resuming stale job");
                self.dispatch(job.job_id).await;
                report.resumed += 1;
            } else {
                job.error = Some("Interrupted before the first stage completed".to_string());
                job.retryable = true;
                job.progress.current_operation = "Failed".to_string();
                job.transition_to(JobStatus::Failed);
                db::jobs::save_job(&self.db, &job).await?;
                warn!(job_id = %job.job_id, "Stale job had no checkpoint, marked failed and retryable");
                self.emit_finished(&job, 0);
                report.failed += 1;
            }
        }

        for job in db::jobs::list_by_status(&self.db, JobStatus::Queued).await? {
            if self.is_live(job.job_id).await {
                continue;
            }
            self.dispatch(job.job_id).await;
            report.requeued += 1;
        }

        if report != RecoveryReport::default() {
            info!(
                resumed = report.resumed,
                failed = report.failed,
                requeued = report.requeued,
                "Job recovery finished"
            );
        }
        Ok(report)
    }

    async fn is_live(&self, job_id: Uuid) -> bool {
        self.cancellation_tokens.read().await.contains_key(&job_id)
    }

    /// Record a finished job's suggestion as a planned site
    pub async fn promote(&self, job_id: Uuid, candidate_id: &str) -> PipelineResult<PromoteOutcome> {
        let job = self.status(job_id).await?;
        let result = db::results::load_result(&self.db, job_id)
            .await?
            .ok_or_else(|| siteplan_common::Error::not_found("result for job", job_id))?;
        let suggestion = result
            .suggestions
            .iter()
            .find(|s| s.id() == candidate_id)
            .ok_or_else(|| {
                siteplan_common::Error::NotFound(format!(
                    "Suggestion {} not in job {}",
                    candidate_id, job_id
                ))
            })?;

        let site = ExclusionSite {
            id: format!("planned-{}-{}", job_id, candidate_id),
            location: suggestion.survivor.scored.location(),
            kind: SiteKind::Planned,
        };
        let created = db::sites::add_site(
            &self.db,
            &job.params.region_key,
            &site,
            Some(job_id),
            self.config.jobs.db_lock_wait_ms,
        )
        .await?;

        info!(
            job_id = %job_id,
            candidate_id,
            site_id = %site.id,
            created,
            "Suggestion promoted to planned site"
        );
        Ok(PromoteOutcome { site, created })
    }
}

fn job_not_found(job_id: Uuid) -> PipelineError {
    PipelineError::Common(siteplan_common::Error::not_found("job", job_id))
}
