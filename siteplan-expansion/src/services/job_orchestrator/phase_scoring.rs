//! SCORING: raw candidates → scored candidates

use super::JobOrchestrator;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{ExclusionSite, Job, JobStage, ScoredCandidate};
use crate::pipeline;
use crate::services::candidate_generator::GenerationReport;
use tokio_util::sync::CancellationToken;

impl JobOrchestrator {
    pub(super) async fn phase_scoring(
        &self,
        job: &mut Job,
        generation: &GenerationReport,
        exclusion: &[ExclusionSite],
        cancel: &CancellationToken,
    ) -> PipelineResult<Vec<ScoredCandidate>> {
        if let Some(scored) = self
            .resume_from::<Vec<ScoredCandidate>>(job, JobStage::Scoring)
            .await?
        {
            return Ok(scored);
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let operation = format!("Scoring {} candidates", generation.candidates.len());
        self.enter_stage(job, JobStage::Scoring, &operation).await?;
        tracing::info!(job_id = %job.job_id, candidates = generation.candidates.len(), "Phase 2: SCORING");

        let scored = pipeline::score(generation, exclusion, &self.config);

        let estimated = scored
            .iter()
            .filter(|s| s.completeness_score < 1.0)
            .count();
        tracing::debug!(
            job_id = %job.job_id,
            scored = scored.len(),
            with_estimated_inputs = estimated,
            "Candidates scored"
        );

        self.complete_stage(job, JobStage::Scoring, &scored).await?;
        Ok(scored)
    }
}
