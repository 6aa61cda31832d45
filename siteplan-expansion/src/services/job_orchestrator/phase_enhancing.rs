//! ENHANCING: survivors → suggestions with AI or deterministic rationale

use super::JobOrchestrator;
use crate::db;
use crate::error::PipelineResult;
use crate::models::{DedupOutcome, Job, JobFlag, JobStage};
use crate::services::cost_ledger::CostLedger;
use crate::services::cost_tiered_enhancer::{EnhanceParams, EnhancementOutcome, EnhancementProgress};
use chrono::Utc;
use siteplan_common::events::ExpansionEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

impl JobOrchestrator {
    /// Enhance survivors under the job's cost cap and the global rate limits
    ///
    /// Never fails the job on AI trouble: demotions become flags. The cost
    /// accumulator is persisted as calls settle, so a resumed job keeps
    /// counting from what it already spent.
    pub(super) async fn phase_enhancing(
        &self,
        job: &mut Job,
        dedup: &DedupOutcome,
        cancel: &CancellationToken,
    ) -> PipelineResult<EnhancementOutcome> {
        if let Some(outcome) = self
            .resume_from::<EnhancementOutcome>(job, JobStage::Enhancing)
            .await?
        {
            job.demoted_count = outcome.demoted_count();
            record_enhancement_flags(job, &outcome);
            return Ok(outcome);
        }

        let operation = format!("Enhancing {} survivors", dedup.survivors.len());
        self.enter_stage(job, JobStage::Enhancing, &operation).await?;
        tracing::info!(job_id = %job.job_id, survivors = dedup.survivors.len(), "Phase 4: ENHANCING");

        let ledger = Arc::new(CostLedger::with_spent(
            job.params.cost_caps.job_cost_cap,
            job.cost_accumulated,
        ));
        let params = EnhanceParams {
            job_id: job.job_id,
            ai_enabled: job.params.ai_enabled,
            ai_fraction: job.params.ai_fraction,
            ai_hard_cap: job.params.cost_caps.ai_hard_cap,
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let enhance = self.enhancer.enhance(
            dedup.survivors.clone(),
            &params,
            ledger.clone(),
            cancel,
            Some(tx),
        );

        // Drains until the enhancer drops its last sender
        let track = async {
            while let Some(update) = rx.recv().await {
                match update {
                    EnhancementProgress::Completed { done, total } => {
                        job.progress.advance_within_stage(done, total);
                        job.progress.current_operation = format!("Enhanced {} of {} survivors", done, total);
                        job.cost_accumulated = ledger.accumulated();
                        job.updated_at = Utc::now();
                        if let Err(e) = db::jobs::save_job(&self.db, job).await {
                            tracing::warn!(job_id = %job.job_id, error = %e, "Failed to persist enhancement progress");
                        }
                        self.emit_progress(job);
                    }
                    EnhancementProgress::Demoted {
                        candidate_id,
                        reason,
                    } => {
                        self.event_bus.emit_lossy(ExpansionEvent::SuggestionDemoted {
                            job_id: job.job_id,
                            candidate_id,
                            reason: reason.as_str().to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                }
            }
        };

        let (outcome, ()) = tokio::join!(enhance, track);

        job.cost_accumulated = ledger.accumulated();
        job.demoted_count = outcome.demoted_count();
        record_enhancement_flags(job, &outcome);

        tracing::info!(
            job_id = %job.job_id,
            intended_ai_tier = outcome.intended_ai_tier,
            ai = outcome.ai_count(),
            cache_hits = outcome.cache_hits,
            demoted = job.demoted_count,
            cost = job.cost_accumulated,
            cap = job.params.cost_caps.job_cost_cap,
            "Enhancement stage finished"
        );

        self.complete_stage(job, JobStage::Enhancing, &outcome).await?;
        Ok(outcome)
    }
}

fn record_enhancement_flags(job: &mut Job, outcome: &EnhancementOutcome) {
    if outcome.cost_capped > 0 {
        job.record_flag(JobFlag::CostCapExceeded {
            demoted: outcome.cost_capped,
        });
    }
    if outcome.rate_limited > 0 {
        job.record_flag(JobFlag::RateLimitExceeded {
            demoted: outcome.rate_limited,
        });
    }
    if outcome.ai_failures > 0 {
        job.record_flag(JobFlag::AiCallFailures {
            count: outcome.ai_failures,
        });
    }
    if outcome.cancelled > 0 {
        job.record_flag(JobFlag::CancelledDuringEnhancement {
            demoted: outcome.cancelled,
        });
    }
}
