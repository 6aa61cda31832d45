//! DEDUPLICATING: scored candidates → survivors (NMS with fairness)

use super::JobOrchestrator;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{DedupOutcome, ExclusionSite, Job, JobFlag, JobStage, ScoredCandidate};
use crate::pipeline;
use tokio_util::sync::CancellationToken;

impl JobOrchestrator {
    /// Suppress near-duplicates; survivors become available as partial results
    pub(super) async fn phase_deduplicating(
        &self,
        job: &mut Job,
        scored: Vec<ScoredCandidate>,
        exclusion: &[ExclusionSite],
        cancel: &CancellationToken,
    ) -> PipelineResult<DedupOutcome> {
        if let Some(dedup) = self
            .resume_from::<DedupOutcome>(job, JobStage::Deduplicating)
            .await?
        {
            record_shortfall(job, &dedup);
            return Ok(dedup);
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        self.enter_stage(job, JobStage::Deduplicating, "Suppressing near-duplicate candidates")
            .await?;
        tracing::info!(job_id = %job.job_id, candidates = scored.len(), "Phase 3: DEDUPLICATING");

        let dedup = pipeline::deduplicate(
            scored,
            exclusion,
            job.params.target_count,
            self.routing.as_ref(),
            &self.config,
        );

        tracing::info!(
            job_id = %job.job_id,
            survivors = dedup.survivors.len(),
            suppressed = dedup.suppressed.len(),
            region_quota = dedup.region_quota,
            readmitted = dedup.readmitted,
            fairness_capped = dedup.fairness_capped_count(),
            "Deduplication finished"
        );

        record_shortfall(job, &dedup);
        self.complete_stage(job, JobStage::Deduplicating, &dedup).await?;
        Ok(dedup)
    }
}

fn record_shortfall(job: &mut Job, dedup: &DedupOutcome) {
    let target = job.params.target_count;
    if dedup.survivors.len() < target {
        tracing::warn!(
            job_id = %job.job_id,
            survivors = dedup.survivors.len(),
            target,
            "Fewer survivors than requested"
        );
        job.record_flag(JobFlag::InsufficientCandidates {
            survivors: dedup.survivors.len(),
            target,
        });
    }
}
