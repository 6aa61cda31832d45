//! Cost-Tiered Enhancer
//!
//! Splits survivors into an AI tier and a deterministic tier.
//!
//! `ai_tier_size = min(ceil(survivors · ai_fraction), ai_hard_cap)`; the AI
//! tier is always the top of the rank order. For each AI-tier candidate, in
//! rank order:
//!
//! 1. Cancelled → demote (`cancelled`)
//! 2. Budget already exhausted → demote (`cost_cap_exceeded`), even when a
//!    cached rationale exists, so the AI tier stays a prefix of the ranking
//! 3. Rationale cache hit → AI tier at zero cost
//! 4. Reserve the worst-case call price, waiting for in-flight calls to
//!    settle when the cap is only held by their reservations. A refusal
//!    exhausts the budget and demotes this and every later candidate.
//! 5. Dispatch to the bounded worker pool. Inside the worker the global
//!    limiter must grant a slot (`rate_limited` otherwise) and the provider
//!    must answer within the call timeout (`ai_call_failed` otherwise).
//!
//! Demoted and non-tier survivors get [`deterministic_rationale`], built
//! only from the candidate's own score components.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{CacheConfig, EnhancementConfig};
use crate::models::{
    AiUsage, DemotionReason, EnhancedSuggestion, EnhancementTier, ScoreComponentKind, Survivor,
};
use crate::services::cost_ledger::CostLedger;
use crate::services::rate_limiter::AiDispatchLimiter;
use crate::services::rationale_provider::{RationaleError, RationaleProvider, RationaleRequest};
use crate::services::result_cache::{CacheKey, ResultCache};

/// AI tier size for a survivor list
pub fn ai_tier_size(survivor_count: usize, ai_fraction: f64, ai_hard_cap: usize, ai_enabled: bool) -> usize {
    if !ai_enabled || survivor_count == 0 {
        return 0;
    }
    let fraction = ai_fraction.clamp(0.0, 1.0);
    // Epsilon keeps products like 0.7 * 10 from rounding up past the exact value
    let by_fraction = (survivor_count as f64 * fraction - 1e-9).ceil().max(0.0) as usize;
    by_fraction.min(ai_hard_cap).min(survivor_count)
}

/// Template rationale derived only from the candidate's score components
pub fn deterministic_rationale(survivor: &Survivor) -> String {
    let scored = &survivor.scored;
    let mut parts = vec![format!(
        "Composite score {:.2} with {:.0}% of inputs from measured data.",
        scored.total_score,
        scored.completeness_score * 100.0
    )];

    let by_score = |a: &&crate::models::ComponentScore, b: &&crate::models::ComponentScore| {
        a.score.total_cmp(&b.score).then_with(|| b.kind.cmp(&a.kind))
    };
    let strongest = scored.breakdown.iter().max_by(by_score);
    let weakest = scored.breakdown.iter().min_by(by_score);
    if let (Some(strong), Some(weak)) = (strongest, weakest) {
        parts.push(format!(
            "Strongest factor: {} ({:.2}); weakest: {} ({:.2}).",
            strong.kind.label(),
            strong.score,
            weak.kind.label(),
            weak.score
        ));
    }

    for component in &scored.breakdown {
        let estimated = if component.quality.is_estimated() {
            " (estimated)"
        } else {
            ""
        };
        let line = match (component.kind, component.raw_value) {
            (ScoreComponentKind::Population, Some(p)) => {
                format!("Catchment population about {:.0}{}.", p, estimated)
            }
            (ScoreComponentKind::ProximityGap, Some(d)) => {
                format!("Nearest existing or planned site {:.1} km away{}.", d, estimated)
            }
            (ScoreComponentKind::ProximityGap, None) => {
                "No existing or planned site in the region.".to_string()
            }
            (ScoreComponentKind::AnchorDensity, Some(n)) => {
                format!("{:.0} distinct anchor points of interest nearby{}.", n, estimated)
            }
            (ScoreComponentKind::PerformancePotential, Some(v)) => {
                format!("Performance potential index {:.2}{}.", v, estimated)
            }
            (_, None) => continue,
        };
        parts.push(line);
    }

    parts.join(" ")
}

/// Payload stored in the rationale cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedRationale {
    pub text: String,
    pub tokens_used: u32,
    pub model_id: String,
}

/// Progress notifications sent while enhancing
#[derive(Debug, Clone)]
pub enum EnhancementProgress {
    /// One more survivor has its final rationale
    Completed { done: usize, total: usize },
    Demoted {
        candidate_id: String,
        reason: DemotionReason,
    },
}

/// Per-job enhancement parameters
#[derive(Debug, Clone)]
pub struct EnhanceParams {
    pub job_id: Uuid,
    pub ai_enabled: bool,
    pub ai_fraction: f64,
    pub ai_hard_cap: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnhancementOutcome {
    /// One suggestion per survivor, in rank order
    pub suggestions: Vec<EnhancedSuggestion>,
    pub intended_ai_tier: usize,
    pub cache_hits: usize,
    pub cost_capped: usize,
    pub rate_limited: usize,
    pub ai_failures: usize,
    pub cancelled: usize,
}

impl EnhancementOutcome {
    pub fn ai_count(&self) -> usize {
        self.suggestions.iter().filter(|s| s.is_ai()).count()
    }

    pub fn demoted_count(&self) -> usize {
        self.cost_capped + self.rate_limited + self.ai_failures + self.cancelled
    }

    pub fn total_cost(&self) -> f64 {
        self.suggestions
            .iter()
            .filter_map(|s| s.ai.as_ref().map(|a| a.cost))
            .sum()
    }
}

enum Slot {
    Ai(AiUsage, String),
    Demoted(DemotionReason),
}

pub struct CostTieredEnhancer {
    provider: Arc<dyn RationaleProvider>,
    cache: ResultCache,
    limiter: Arc<AiDispatchLimiter>,
    config: EnhancementConfig,
    coordinate_decimals: u32,
}

impl CostTieredEnhancer {
    pub fn new(
        provider: Arc<dyn RationaleProvider>,
        cache: ResultCache,
        limiter: Arc<AiDispatchLimiter>,
        config: EnhancementConfig,
        cache_config: &CacheConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            limiter,
            config,
            coordinate_decimals: cache_config.coordinate_decimals,
        }
    }

    pub async fn enhance(
        &self,
        survivors: Vec<Survivor>,
        params: &EnhanceParams,
        ledger: Arc<CostLedger>,
        cancel: &CancellationToken,
        progress: Option<mpsc::UnboundedSender<EnhancementProgress>>,
    ) -> EnhancementOutcome {
        let total = survivors.len();
        let tier = ai_tier_size(total, params.ai_fraction, params.ai_hard_cap, params.ai_enabled);
        let model_id = self.provider.model_id().to_string();
        let done = Arc::new(AtomicUsize::new(0));
        let report_done = {
            let progress = progress.clone();
            let done = done.clone();
            move || {
                let now = done.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(tx) = &progress {
                    let _ = tx.send(EnhancementProgress::Completed { done: now, total });
                }
            }
        };

        info!(
            job_id = %params.job_id,
            survivors = total,
            ai_tier = tier,
            cost_cap = ledger.cap(),
            "Starting enhancement"
        );

        let mut slots: Vec<Option<Slot>> = (0..tier).map(|_| None).collect();
        let mut handles = Vec::new();
        let pool = Arc::new(Semaphore::new(self.config.worker_pool_size.max(1)));

        if tier > 0 && !ledger.can_afford(self.config.max_cost_per_call) {
            info!(
                job_id = %params.job_id,
                spent = ledger.accumulated(),
                cap = ledger.cap(),
                call_price = self.config.max_cost_per_call,
                "Budget cannot cover one AI call, demoting the whole AI tier"
            );
        }

        for (index, survivor) in survivors.iter().take(tier).enumerate() {
            if cancel.is_cancelled() {
                slots[index] = Some(Slot::Demoted(DemotionReason::Cancelled));
                continue;
            }

            // Past exhaustion the rest of the tier demotes, cached or not
            if ledger.is_exhausted() {
                slots[index] = Some(Slot::Demoted(DemotionReason::CostCapExceeded));
                continue;
            }

            let key = CacheKey::for_rationale(&model_id, &survivor.scored, self.coordinate_decimals);
            if let Some(cached) = self.cached(&key).await {
                info!(
                    job_id = %params.job_id,
                    candidate_id = survivor.id(),
                    "Rationale cache hit"
                );
                slots[index] = Some(Slot::Ai(
                    AiUsage {
                        tokens_used: cached.tokens_used,
                        cost: 0.0,
                        ai_processing_rank: index + 1,
                        model_id: cached.model_id,
                        cache_hit: true,
                    },
                    cached.text,
                ));
                report_done();
                continue;
            }

            let reserved = tokio::select! {
                reserved = ledger.reserve(self.config.max_cost_per_call) => Some(reserved),
                _ = cancel.cancelled() => None,
            };
            let reservation = match reserved {
                Some(Ok(r)) => r,
                Some(Err(e)) => {
                    debug!(job_id = %params.job_id, candidate_id = survivor.id(), error = %e, "Budget refused");
                    slots[index] = Some(Slot::Demoted(DemotionReason::CostCapExceeded));
                    continue;
                }
                None => {
                    slots[index] = Some(Slot::Demoted(DemotionReason::Cancelled));
                    continue;
                }
            };

            let worker = tokio::select! {
                permit = pool.clone().acquire_owned() => permit.ok(),
                _ = cancel.cancelled() => None,
            };
            let Some(worker) = worker else {
                ledger.release(reservation);
                slots[index] = Some(Slot::Demoted(DemotionReason::Cancelled));
                continue;
            };

            let request = RationaleRequest::from_scored(&model_id, &survivor.scored);
            let provider = self.provider.clone();
            let limiter = self.limiter.clone();
            let cache = self.cache.clone();
            let ledger = ledger.clone();
            let timeout = self.config.call_timeout();
            let model = model_id.clone();
            let job_id = params.job_id;
            let report = report_done.clone();

            let handle = tokio::spawn(async move {
                let _worker = worker;
                let _dispatch = match limiter.acquire().await {
                    Ok(permit) => permit,
                    Err(denied) => {
                        ledger.release(reservation);
                        warn!(%job_id, candidate_id = %request.candidate_id, reason = %denied, "AI dispatch rate-limited");
                        return Slot::Demoted(DemotionReason::RateLimited);
                    }
                };

                let result = match tokio::time::timeout(timeout, provider.generate(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(RationaleError::Timeout(timeout)),
                };

                match result {
                    Ok(response) => {
                        let charged = ledger.settle(reservation, response.cost);
                        report();
                        let payload = CachedRationale {
                            text: response.text.clone(),
                            tokens_used: response.tokens_used,
                            model_id: model.clone(),
                        };
                        match serde_json::to_string(&payload) {
                            Ok(json) => cache.put(key, json, &model).await,
                            Err(e) => warn!(%job_id, error = %e, "Could not encode rationale for cache"),
                        }
                        Slot::Ai(
                            AiUsage {
                                tokens_used: response.tokens_used,
                                cost: charged,
                                ai_processing_rank: index + 1,
                                model_id: model,
                                cache_hit: false,
                            },
                            response.text,
                        )
                    }
                    Err(e) => {
                        ledger.release(reservation);
                        warn!(%job_id, candidate_id = %request.candidate_id, error = %e, "AI call failed, demoting");
                        Slot::Demoted(DemotionReason::AiCallFailed)
                    }
                }
            });
            handles.push((index, handle));
        }

        for (index, handle) in handles {
            let slot = match handle.await {
                Ok(slot) => slot,
                Err(e) => {
                    warn!(job_id = %params.job_id, error = %e, "AI worker task failed");
                    Slot::Demoted(DemotionReason::AiCallFailed)
                }
            };
            slots[index] = Some(slot);
        }

        let mut outcome = EnhancementOutcome {
            intended_ai_tier: tier,
            ..Default::default()
        };

        for (index, survivor) in survivors.into_iter().enumerate() {
            let slot = if index < tier { slots[index].take() } else { None };
            let suggestion = match slot {
                Some(Slot::Ai(usage, text)) => {
                    if usage.cache_hit {
                        outcome.cache_hits += 1;
                    }
                    EnhancedSuggestion {
                        survivor,
                        rationale_text: text,
                        enhancement_tier: EnhancementTier::Ai,
                        ai: Some(usage),
                        demoted: None,
                    }
                }
                Some(Slot::Demoted(reason)) => {
                    match reason {
                        DemotionReason::CostCapExceeded => outcome.cost_capped += 1,
                        DemotionReason::RateLimited => outcome.rate_limited += 1,
                        DemotionReason::AiCallFailed => outcome.ai_failures += 1,
                        DemotionReason::Cancelled => outcome.cancelled += 1,
                    }
                    if let Some(tx) = &progress {
                        let _ = tx.send(EnhancementProgress::Demoted {
                            candidate_id: survivor.id().to_string(),
                            reason,
                        });
                    }
                    report_done();
                    deterministic_suggestion(survivor, Some(reason))
                }
                None => {
                    report_done();
                    deterministic_suggestion(survivor, None)
                }
            };
            outcome.suggestions.push(suggestion);
        }

        info!(
            job_id = %params.job_id,
            ai = outcome.ai_count(),
            deterministic = outcome.suggestions.len() - outcome.ai_count(),
            demoted = outcome.demoted_count(),
            cache_hits = outcome.cache_hits,
            cost = ledger.accumulated(),
            "Enhancement finished"
        );

        outcome
    }

    async fn cached(&self, key: &CacheKey) -> Option<CachedRationale> {
        let payload = self.cache.get(key).await?;
        match serde_json::from_str::<CachedRationale>(&payload) {
            Ok(cached) => Some(cached),
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "Ignoring unreadable cache entry");
                None
            }
        }
    }
}

/// Suggestion carrying [`deterministic_rationale`]
pub fn deterministic_suggestion(survivor: Survivor, demoted: Option<DemotionReason>) -> EnhancedSuggestion {
    let rationale_text = deterministic_rationale(&survivor);
    EnhancedSuggestion {
        survivor,
        rationale_text,
        enhancement_tier: EnhancementTier::Deterministic,
        ai: None,
        demoted,
    }
}
