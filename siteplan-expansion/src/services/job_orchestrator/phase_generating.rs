//! GENERATING: region snapshot → raw candidates

use super::JobOrchestrator;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{ExclusionSite, Job, JobFlag, JobStage};
use crate::pipeline;
use crate::services::candidate_generator::GenerationReport;
use tokio_util::sync::CancellationToken;

impl JobOrchestrator {
    /// Load the region and generate oversampled raw candidates
    ///
    /// A region that cannot be loaded at all fails the job
    /// (`BoundaryDataUnavailable`).
    pub(super) async fn phase_generating(
        &self,
        job: &mut Job,
        exclusion: &[ExclusionSite],
        cancel: &CancellationToken,
    ) -> PipelineResult<GenerationReport> {
        if let Some(report) = self
            .resume_from::<GenerationReport>(job, JobStage::Generating)
            .await?
        {
            record_generation_flags(job, &report);
            return Ok(report);
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        self.enter_stage(job, JobStage::Generating, "Loading region data")
            .await?;
        let region = self.regions.load_region(&job.params.region_key).await?;

        tracing::info!(
            job_id = %job.job_id,
            region = %region.key,
            sub_regions = region.sub_regions.len(),
            settlements = region.settlements.len(),
            anchor_pois = region.anchor_pois.len(),
            exclusion_sites = exclusion.len(),
            "Phase 1: GENERATING"
        );

        // Grid exploration over a whole country is CPU-bound
        let config = self.config.clone();
        let exclusion_owned = exclusion.to_vec();
        let target = job.params.target_count;
        let seed = job.params.seed;
        let report = tokio::task::spawn_blocking(move || {
            pipeline::generate(&region, &exclusion_owned, target, &config, seed)
        })
        .await
        .map_err(|e| {
            siteplan_common::Error::Internal(format!("Candidate generation task failed: {}", e))
        })?;

        tracing::info!(
            job_id = %job.job_id,
            generated = report.candidates.len(),
            requested = report.requested,
            settlements = report.settlement_count,
            grid = report.grid_count,
            rejected_off_land = report.rejected_off_land,
            rejected_exclusion = report.rejected_exclusion,
            rejected_sub_region_cap = report.rejected_sub_region_cap,
            "Candidates generated"
        );

        record_generation_flags(job, &report);
        self.complete_stage(job, JobStage::Generating, &report).await?;
        Ok(report)
    }
}

fn record_generation_flags(job: &mut Job, report: &GenerationReport) {
    if report.under_produced() {
        tracing::warn!(
            job_id = %job.job_id,
            generated = report.candidates.len(),
            requested = report.requested,
            "Generator under-produced"
        );
        job.record_flag(JobFlag::UnderProduction {
            generated: report.candidates.len(),
            requested: report.requested,
        });
    }
}
