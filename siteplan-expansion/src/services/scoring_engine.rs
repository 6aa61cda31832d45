//! Scoring Engine
//!
//! Fuses four independently-sourced components into one confidence score:
//!
//! | Component | Raw input | Normalization |
//! |-----------|-----------|---------------|
//! | Population | catchment residents | `p / (p + half_saturation)` |
//! | Proximity gap | km to nearest existing/planned site | `min(d / saturation, 1)` |
//! | Anchor density | merged anchor POIs in catchment | `n / (n + half_saturation)` |
//! | Performance potential | density index and anchor diversity | `0.6·density + 0.4·diversity` |
//!
//! `total_score = Σ effective_weight · score`. Estimated components never
//! carry more than `estimated_weight_cap` of the total weight; the excess
//! goes to measured components in proportion to their nominal weight.
//! Scoring is pure and deterministic.

use crate::config::ScoringConfig;
use crate::models::{
    AnchorCategory, Candidate, ComponentScore, DataQuality, ExclusionSite, ScoreComponentKind,
    ScoredCandidate,
};

const DENSITY_SHARE: f64 = 0.6;
const DIVERSITY_SHARE: f64 = 0.4;

/// Effective weight shares after quality capping
///
/// `nominal` is normalized to sum to 1. Each estimated component gets
/// `min(nominal, cap)`. The weight removed from estimated components is
/// redistributed over measured components in proportion to their nominal
/// weight. With no measured weight to absorb it, it stays unassigned, so
/// the shares sum to less than 1.
pub fn effective_weights(nominal: [f64; 4], estimated: [bool; 4], cap: f64) -> [f64; 4] {
    let total: f64 = nominal.iter().sum();
    if total <= 0.0 {
        return [0.0; 4];
    }
    let base = nominal.map(|w| w / total);

    let mut effective = [0.0; 4];
    let mut excess = 0.0;
    let mut measured_base = 0.0;
    for i in 0..4 {
        if estimated[i] {
            effective[i] = base[i].min(cap);
            excess += base[i] - effective[i];
        } else {
            effective[i] = base[i];
            measured_base += base[i];
        }
    }

    if excess > 0.0 && measured_base > 0.0 {
        for i in 0..4 {
            if !estimated[i] {
                effective[i] += excess * base[i] / measured_base;
            }
        }
    }

    effective
}

pub struct ScoringEngine<'a> {
    config: &'a ScoringConfig,
}

impl<'a> ScoringEngine<'a> {
    pub fn new(config: &'a ScoringConfig) -> Self {
        Self { config }
    }

    /// Score every candidate (input order preserved)
    pub fn score_all(&self, candidates: &[Candidate], exclusion: &[ExclusionSite]) -> Vec<ScoredCandidate> {
        candidates
            .iter()
            .map(|candidate| self.score(candidate, exclusion))
            .collect()
    }

    pub fn score(&self, candidate: &Candidate, exclusion: &[ExclusionSite]) -> ScoredCandidate {
        let raw = [
            self.population(candidate),
            self.proximity_gap(candidate, exclusion),
            self.anchor_density(candidate),
            self.performance_potential(candidate),
        ];

        let w = &self.config.weights;
        let nominal = [
            w.population,
            w.proximity_gap,
            w.anchor_density,
            w.performance_potential,
        ];
        let nominal_total: f64 = nominal.iter().sum();
        let estimated = raw.map(|(_, _, quality)| quality.is_estimated());
        let effective = effective_weights(nominal, estimated, self.config.estimated_weight_cap);

        let mut breakdown = Vec::with_capacity(4);
        let mut total_score = 0.0;
        for (i, kind) in ScoreComponentKind::ALL.iter().enumerate() {
            let (raw_value, score, quality) = raw[i];
            let contribution = effective[i] * score;
            total_score += contribution;
            breakdown.push(ComponentScore {
                kind: *kind,
                raw_value,
                score,
                quality,
                nominal_weight: if nominal_total > 0.0 {
                    nominal[i] / nominal_total
                } else {
                    0.0
                },
                effective_weight: effective[i],
                contribution,
            });
        }

        let measured = estimated.iter().filter(|e| !**e).count();

        ScoredCandidate {
            candidate: candidate.clone(),
            total_score: total_score.clamp(0.0, 1.0),
            breakdown,
            completeness_score: measured as f64 / 4.0,
            region_key: candidate.sub_region_key.clone(),
        }
    }

    fn population(&self, candidate: &Candidate) -> (Option<f64>, f64, DataQuality) {
        let p = candidate.estimated_population as f64;
        let score = p / (p + self.config.population_half_saturation);
        (Some(p), score, candidate.data_quality.population)
    }

    /// Distance to the nearest existing or planned site
    ///
    /// With no sites in the region the gap is maximal and the raw value absent.
    fn proximity_gap(
        &self,
        candidate: &Candidate,
        exclusion: &[ExclusionSite],
    ) -> (Option<f64>, f64, DataQuality) {
        let nearest = exclusion
            .iter()
            .map(|site| site.location.distance_km(&candidate.location))
            .min_by(|a, b| a.total_cmp(b));
        let quality = candidate.data_quality.location;
        match nearest {
            Some(d) => (
                Some(d),
                (d / self.config.proximity_saturation_km).min(1.0),
                quality,
            ),
            None => (None, 1.0, quality),
        }
    }

    fn anchor_density(&self, candidate: &Candidate) -> (Option<f64>, f64, DataQuality) {
        let n = candidate.total_anchors() as f64;
        let score = n / (n + self.config.anchor_half_saturation);
        (Some(n), score, candidate.data_quality.anchors)
    }

    /// Proxy only; always estimated
    fn performance_potential(&self, candidate: &Candidate) -> (Option<f64>, f64, DataQuality) {
        let diversity = candidate.anchor_diversity() as f64 / AnchorCategory::ALL.len() as f64;
        let value = (DENSITY_SHARE * candidate.urban_density_index.clamp(0.0, 1.0)
            + DIVERSITY_SHARE * diversity)
            .clamp(0.0, 1.0);
        (Some(value), value, DataQuality::Estimated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttributeQuality, GeoPoint, SiteKind, SourceType};
    use std::collections::BTreeMap;

    fn candidate(population: u64, quality: DataQuality) -> Candidate {
        let mut anchors = BTreeMap::new();
        anchors.insert(AnchorCategory::Grocery, 4);
        anchors.insert(AnchorCategory::Transit, 2);
        Candidate {
            id: "c1".to_string(),
            location: GeoPoint::new(45.0, 7.0),
            source_type: SourceType::Settlement,
            sub_region_key: "north".to_string(),
            estimated_population: population,
            urban_density_index: 0.5,
            anchor_counts: anchors,
            data_quality: AttributeQuality {
                location: quality,
                population: quality,
                urban_density: quality,
                anchors: quality,
            },
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_effective_weights_all_measured_are_nominal() {
        let w = effective_weights([0.35, 0.25, 0.25, 0.15], [false; 4], 0.25);
        assert!(approx(w[0], 0.35));
        assert!(approx(w.iter().sum::<f64>(), 1.0));
    }

    #[test]
    fn test_estimated_component_capped_and_excess_redistributed() {
        // Population estimated at nominal 0.5, capped to 0.25
        let w = effective_weights([0.5, 0.25, 0.25, 0.0], [true, false, false, false], 0.25);
        assert!(approx(w[0], 0.25));
        assert!(approx(w[1], 0.375));
        assert!(approx(w[2], 0.375));
        assert!(approx(w.iter().sum::<f64>(), 1.0));
    }

    #[test]
    fn test_all_estimated_leaves_weight_unassigned() {
        let w = effective_weights([0.35, 0.25, 0.25, 0.15], [true; 4], 0.25);
        assert!(w.iter().all(|x| *x <= 0.25 + 1e-12));
        assert!(approx(w.iter().sum::<f64>(), 0.9));
    }

    #[test]
    fn test_weights_are_normalized() {
        let w = effective_weights([7.0, 5.0, 5.0, 3.0], [false, false, false, true], 0.25);
        assert!(approx(w[3], 0.15));
        assert!(approx(w.iter().sum::<f64>(), 1.0));
    }

    #[test]
    fn test_score_breakdown_and_completeness() {
        let config = ScoringConfig::default();
        let engine = ScoringEngine::new(&config);
        let scored = engine.score(&candidate(20_000, DataQuality::Measured), &[]);

        assert_eq!(scored.breakdown.len(), 4);
        // Performance potential is always estimated
        assert!(approx(scored.completeness_score, 0.75));
        let pop = scored.component(ScoreComponentKind::Population).unwrap();
        assert!(approx(pop.score, 0.5));
        let gap = scored.component(ScoreComponentKind::ProximityGap).unwrap();
        assert_eq!(gap.raw_value, None);
        assert!(approx(gap.score, 1.0));
        let sum: f64 = scored.breakdown.iter().map(|c| c.contribution).sum();
        assert!(approx(sum, scored.total_score));
        assert!(scored.total_score > 0.0 && scored.total_score <= 1.0);
        assert_eq!(scored.region_key, "north");
    }

    #[test]
    fn test_nearby_site_lowers_gap_score() {
        let config = ScoringConfig::default();
        let engine = ScoringEngine::new(&config);
        let far = ExclusionSite {
            id: "s-far".to_string(),
            location: GeoPoint::new(46.0, 7.0),
            kind: SiteKind::Existing,
        };
        let near = ExclusionSite {
            id: "s-near".to_string(),
            location: GeoPoint::new(45.05, 7.0),
            kind: SiteKind::Planned,
        };
        let c = candidate(20_000, DataQuality::Measured);
        let with_far = engine.score(&c, &[far.clone()]);
        let with_near = engine.score(&c, &[far, near]);
        assert!(with_near.total_score < with_far.total_score);
        let gap = with_near.component(ScoreComponentKind::ProximityGap).unwrap();
        assert!((gap.raw_value.unwrap() - 5.56).abs() < 0.05);
    }

    #[test]
    fn test_estimated_inputs_never_dominate() {
        let config = ScoringConfig::default();
        let engine = ScoringEngine::new(&config);
        let scored = engine.score(&candidate(1_000_000, DataQuality::Estimated), &[]);
        for component in &scored.breakdown {
            if component.quality.is_estimated() {
                assert!(component.effective_weight <= config.estimated_weight_cap + 1e-12);
            }
        }
        assert!(approx(scored.completeness_score, 0.0));
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let config = ScoringConfig::default();
        let engine = ScoringEngine::new(&config);
        let c = candidate(12_345, DataQuality::Measured);
        let a = engine.score(&c, &[]);
        let b = engine.score(&c, &[]);
        assert_eq!(a.total_score.to_bits(), b.total_score.to_bits());
        assert_eq!(a.breakdown, b.breakdown);
    }
}
