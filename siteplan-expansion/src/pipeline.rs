//! Pure planning core: generate → score → deduplicate
//!
//! No I/O, no clocks, no randomness beyond the seed. The job orchestrator
//! calls the stage functions one at a time so it can checkpoint between
//! them; tests and offline tools call [`plan`] directly.

use serde::{Deserialize, Serialize};

use crate::config::ExpansionConfig;
use crate::models::{DedupOutcome, ExclusionSite, RegionSnapshot, ScoredCandidate};
use crate::services::anchor_index::AnchorIndex;
use crate::services::candidate_generator::{CandidateGenerator, GenerationReport};
use crate::services::providers::DriveTimeModel;
use crate::services::scoring_engine::ScoringEngine;
use crate::services::spatial_deduplicator::SpatialDeduplicator;

/// Inputs the core reads
pub struct PlanInputs<'a> {
    pub region: &'a RegionSnapshot,
    pub exclusion: &'a [ExclusionSite],
    pub target_count: usize,
    pub routing: &'a dyn DriveTimeModel,
}

/// Output of the three deterministic stages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorePlan {
    pub generation: GenerationReport,
    pub scored: Vec<ScoredCandidate>,
    pub dedup: DedupOutcome,
}

/// Raw candidates to request for a target survivor count
pub fn raw_request(target_count: usize, config: &ExpansionConfig) -> usize {
    (target_count as f64 * config.generation.oversample_factor).ceil() as usize
}

pub fn generate(
    region: &RegionSnapshot,
    exclusion: &[ExclusionSite],
    target_count: usize,
    config: &ExpansionConfig,
    seed: u64,
) -> GenerationReport {
    let anchors = AnchorIndex::build(&region.anchor_pois, config.scoring.poi_coincidence_radius_m);
    tracing::debug!(
        region = %region.key,
        raw_pois = anchors.raw_count(),
        merged_pois = anchors.merged_count(),
        "Anchor POIs merged"
    );
    CandidateGenerator::new(&config.generation, &anchors).generate(
        region,
        exclusion,
        raw_request(target_count, config),
        seed,
    )
}

pub fn score(
    report: &GenerationReport,
    exclusion: &[ExclusionSite],
    config: &ExpansionConfig,
) -> Vec<ScoredCandidate> {
    ScoringEngine::new(&config.scoring).score_all(&report.candidates, exclusion)
}

pub fn deduplicate(
    scored: Vec<ScoredCandidate>,
    exclusion: &[ExclusionSite],
    target_count: usize,
    routing: &dyn DriveTimeModel,
    config: &ExpansionConfig,
) -> DedupOutcome {
    SpatialDeduplicator::new(&config.dedup, routing).deduplicate(scored, exclusion, target_count)
}

/// Run all three stages
pub fn plan(inputs: &PlanInputs<'_>, config: &ExpansionConfig, seed: u64) -> CorePlan {
    let generation = generate(inputs.region, inputs.exclusion, inputs.target_count, config, seed);
    let scored = score(&generation, inputs.exclusion, config);
    let dedup = deduplicate(
        scored.clone(),
        inputs.exclusion,
        inputs.target_count,
        inputs.routing,
        config,
    );
    CorePlan {
        generation,
        scored,
        dedup,
    }
}
