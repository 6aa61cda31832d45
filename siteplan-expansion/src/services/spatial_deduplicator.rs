//! Spatial Deduplicator
//!
//! Greedy non-max suppression with a per-region fairness quota.
//!
//! **Pass one**, in score order (ties by candidate id):
//! 1. Target already filled → `target_reached`
//! 2. Within the suppression radius of an existing/planned site → `near_site`
//! 3. Within the radius of an accepted survivor → `dominated` by the
//!    highest-ranked such survivor
//! 4. Region already holds its quota → `fairness_capped` (soft reject)
//! 5. Otherwise accepted
//!
//! **Pass two** runs only when pass one left the target short. Fairness-capped
//! candidates are revisited in score order, re-checked for spacing against
//! every survivor, and admitted as `fairness_exempt` until the target fills.
//!
//! Distance is drive time converted at the reference speed when the routing
//! model has an answer, else great-circle distance. Great-circle distance
//! never exceeds road distance, so the fallback only errs toward merging.

use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

use crate::config::DedupConfig;
use crate::models::{
    DedupOutcome, ExclusionSite, GeoPoint, ScoredCandidate, SuppressedCandidate, SuppressionReason,
    Survivor,
};
use crate::services::providers::DriveTimeModel;

/// Score descending, then id ascending
pub fn rank_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.total_score
        .total_cmp(&a.total_score)
        .then_with(|| a.id().cmp(b.id()))
}

pub struct SpatialDeduplicator<'a> {
    config: &'a DedupConfig,
    routing: &'a dyn DriveTimeModel,
}

impl<'a> SpatialDeduplicator<'a> {
    pub fn new(config: &'a DedupConfig, routing: &'a dyn DriveTimeModel) -> Self {
        Self { config, routing }
    }

    /// Distance used for suppression, in km or km-equivalent
    pub fn distance_km(&self, a: &GeoPoint, b: &GeoPoint) -> f64 {
        match self.routing.drive_minutes(a, b) {
            Some(minutes) if minutes.is_finite() && minutes >= 0.0 => {
                minutes / 60.0 * self.config.reference_speed_kmh
            }
            _ => a.distance_km(b),
        }
    }

    /// Pass-one slots per fairness region
    pub fn region_quota(&self, target: usize) -> usize {
        ((target as f64 * self.config.fairness_share).ceil() as usize).max(1)
    }

    pub fn deduplicate(
        &self,
        mut scored: Vec<ScoredCandidate>,
        exclusion: &[ExclusionSite],
        target: usize,
    ) -> DedupOutcome {
        scored.sort_by(rank_order);

        let radius = self.config.suppression_radius_km;
        let quota = self.region_quota(target);

        let mut accepted: Vec<(ScoredCandidate, bool)> = Vec::new();
        let mut suppressed: Vec<SuppressedCandidate> = Vec::new();
        let mut capped: Vec<ScoredCandidate> = Vec::new();
        let mut per_region: HashMap<String, usize> = HashMap::new();

        for candidate in scored {
            if accepted.len() >= target {
                suppressed.push(record(&candidate, SuppressionReason::TargetReached));
                continue;
            }

            if let Some(site_id) = self.nearest_site_within(&candidate, exclusion, radius) {
                suppressed.push(record(&candidate, SuppressionReason::NearSite { site_id }));
                continue;
            }

            if let Some(survivor_id) = self.dominating_survivor(&candidate, &accepted, radius) {
                suppressed.push(record(&candidate, SuppressionReason::Dominated { survivor_id }));
                continue;
            }

            let held = per_region.entry(candidate.region_key.clone()).or_insert(0);
            if *held >= quota {
                capped.push(candidate);
                continue;
            }
            *held += 1;
            accepted.push((candidate, false));
        }

        let mut readmitted = 0;
        for candidate in capped {
            if accepted.len() < target {
                if let Some(survivor_id) = self.dominating_survivor(&candidate, &accepted, radius) {
                    suppressed.push(record(&candidate, SuppressionReason::Dominated { survivor_id }));
                } else {
                    readmitted += 1;
                    accepted.push((candidate, true));
                }
            } else {
                suppressed.push(record(&candidate, SuppressionReason::FairnessCapped));
            }
        }

        accepted.sort_by(|a, b| rank_order(&a.0, &b.0));
        let survivors: Vec<Survivor> = accepted
            .into_iter()
            .enumerate()
            .map(|(i, (scored, fairness_exempt))| Survivor {
                scored,
                rank: i + 1,
                fairness_exempt,
            })
            .collect();

        suppressed.sort_by(|a, b| {
            b.total_score
                .total_cmp(&a.total_score)
                .then_with(|| a.candidate_id.cmp(&b.candidate_id))
        });

        debug!(
            survivors = survivors.len(),
            suppressed = suppressed.len(),
            region_quota = quota,
            readmitted,
            "Deduplication finished"
        );

        DedupOutcome {
            survivors,
            suppressed,
            region_quota: quota,
            readmitted,
        }
    }

    fn nearest_site_within(
        &self,
        candidate: &ScoredCandidate,
        exclusion: &[ExclusionSite],
        radius: f64,
    ) -> Option<String> {
        let location = candidate.location();
        exclusion
            .iter()
            .map(|site| (site, self.distance_km(&location, &site.location)))
            .filter(|(_, d)| *d < radius)
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)))
            .map(|(site, _)| site.id.clone())
    }

    /// Highest-ranked survivor within the radius
    fn dominating_survivor(
        &self,
        candidate: &ScoredCandidate,
        accepted: &[(ScoredCandidate, bool)],
        radius: f64,
    ) -> Option<String> {
        let location = candidate.location();
        accepted
            .iter()
            .filter(|(survivor, _)| self.distance_km(&location, &survivor.location()) < radius)
            .min_by(|a, b| rank_order(&a.0, &b.0))
            .map(|(survivor, _)| survivor.id().to_string())
    }
}

fn record(candidate: &ScoredCandidate, reason: SuppressionReason) -> SuppressedCandidate {
    SuppressedCandidate {
        candidate_id: candidate.id().to_string(),
        total_score: candidate.total_score,
        region_key: candidate.region_key.clone(),
        reason,
    }
}
