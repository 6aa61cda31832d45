//! Deduplication outcome and enhanced suggestions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::candidate::ScoredCandidate;

/// Candidate accepted by spatial deduplication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Survivor {
    pub scored: ScoredCandidate,
    /// 1-based rank among survivors by score
    pub rank: usize,
    /// Admitted in the second pass, beyond its region's fairness quota
    pub fairness_exempt: bool,
}

impl Survivor {
    pub fn id(&self) -> &str {
        self.scored.id()
    }

    pub fn total_score(&self) -> f64 {
        self.scored.total_score
    }
}

/// Why a candidate did not survive deduplication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SuppressionReason {
    /// Within the suppression radius of a higher-scored survivor
    Dominated { survivor_id: String },
    /// Within the suppression radius of an existing or planned site
    NearSite { site_id: String },
    /// Region already holds its fairness quota
    FairnessCapped,
    /// Survivor list already holds the target count
    TargetReached,
}

/// Suppressed candidate with its reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressedCandidate {
    pub candidate_id: String,
    pub total_score: f64,
    pub region_key: String,
    #[serde(flatten)]
    pub reason: SuppressionReason,
}

/// Survivor/suppressed partition produced by NMS
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupOutcome {
    /// Survivors in rank order (score descending, id ascending)
    pub survivors: Vec<Survivor>,
    pub suppressed: Vec<SuppressedCandidate>,
    /// Per-region fairness quota used in pass one
    pub region_quota: usize,
    /// Fairness-capped candidates re-admitted in pass two
    pub readmitted: usize,
}

impl DedupOutcome {
    /// Suppression graph: dominating survivor id -> ids it suppressed
    pub fn suppression_graph(&self) -> BTreeMap<String, Vec<String>> {
        let mut graph: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for suppressed in &self.suppressed {
            if let SuppressionReason::Dominated { survivor_id } = &suppressed.reason {
                graph
                    .entry(survivor_id.clone())
                    .or_default()
                    .push(suppressed.candidate_id.clone());
            }
        }
        graph
    }

    pub fn fairness_capped_count(&self) -> usize {
        self.suppressed
            .iter()
            .filter(|s| s.reason == SuppressionReason::FairnessCapped)
            .count()
    }

    pub fn suppressed_by_id(&self, candidate_id: &str) -> Option<&SuppressedCandidate> {
        self.suppressed.iter().find(|s| s.candidate_id == candidate_id)
    }
}

/// Where a suggestion's rationale came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnhancementTier {
    Ai,
    Deterministic,
}

/// Why an AI-tier candidate received deterministic rationale instead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemotionReason {
    CostCapExceeded,
    RateLimited,
    AiCallFailed,
    Cancelled,
}

impl DemotionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DemotionReason::CostCapExceeded => "cost_cap_exceeded",
            DemotionReason::RateLimited => "rate_limited",
            DemotionReason::AiCallFailed => "ai_call_failed",
            DemotionReason::Cancelled => "cancelled",
        }
    }
}

/// AI usage attached to AI-tier suggestions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiUsage {
    pub tokens_used: u32,
    /// Cost charged to this job (zero on a cache hit)
    pub cost: f64,
    /// 1-based rank within the AI tier
    pub ai_processing_rank: usize,
    pub model_id: String,
    pub cache_hit: bool,
}

/// Final, ranked suggestion returned to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedSuggestion {
    pub survivor: Survivor,
    pub rationale_text: String,
    pub enhancement_tier: EnhancementTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai: Option<AiUsage>,
    /// Set when the candidate was selected for the AI tier but fell back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demoted: Option<DemotionReason>,
}

impl EnhancedSuggestion {
    pub fn id(&self) -> &str {
        self.survivor.id()
    }

    pub fn is_ai(&self) -> bool {
        self.enhancement_tier == EnhancementTier::Ai
    }
}
