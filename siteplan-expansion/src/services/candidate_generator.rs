//! Candidate Generator
//!
//! Produces raw candidates inside a region's land mask from two sources:
//!
//! 1. **Settlements**: one candidate per settlement above the population
//!    floor, largest first.
//! 2. **Grid exploration**: jittered cell centres over the region's bounding
//!    box, visited in a seeded shuffle so picks spread across the region.
//!
//! Every point must be on land and outside the clearance zone of every
//! existing or planned site. Each sub-region may take at most a fixed share
//! of the slots so one metro area cannot exhaust the budget. Producing fewer
//! than requested is reported, never an error.
//!
//! The generator is pure: same inputs and seed give the same candidates.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::config::GenerationConfig;
use crate::models::{
    AttributeQuality, Candidate, DataQuality, ExclusionSite, GeoPoint, LandCheck, RegionSnapshot,
    SourceType, SubRegion,
};
use crate::services::anchor_index::AnchorIndex;
use crate::utils::geo;

/// Why a generated point was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Rejection {
    OffLand,
    ExclusionZone,
    SubRegionCap,
}

/// Generator output plus counters for the run metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationReport {
    pub candidates: Vec<Candidate>,
    pub requested: usize,
    pub settlement_count: usize,
    pub grid_count: usize,
    pub rejected_off_land: usize,
    pub rejected_exclusion: usize,
    pub rejected_sub_region_cap: usize,
    /// Candidates whose land check used a bounding box only
    pub estimated_location_count: usize,
}

impl GenerationReport {
    pub fn under_produced(&self) -> bool {
        self.candidates.len() < self.requested
    }

    fn reject(&mut self, rejection: Rejection) {
        match rejection {
            Rejection::OffLand => self.rejected_off_land += 1,
            Rejection::ExclusionZone => self.rejected_exclusion += 1,
            Rejection::SubRegionCap => self.rejected_sub_region_cap += 1,
        }
    }
}

pub struct CandidateGenerator<'a> {
    config: &'a GenerationConfig,
    anchors: &'a AnchorIndex,
}

impl<'a> CandidateGenerator<'a> {
    pub fn new(config: &'a GenerationConfig, anchors: &'a AnchorIndex) -> Self {
        Self { config, anchors }
    }

    /// Per-sub-region slot cap
    ///
    /// Never below an even split, so caps alone cannot make the request
    /// infeasible.
    pub fn sub_region_cap(&self, requested: usize, sub_region_count: usize) -> usize {
        let share = (requested as f64 * self.config.sub_region_cap_share).ceil() as usize;
        let even = requested.div_ceil(sub_region_count.max(1));
        share.max(even).max(1)
    }

    /// Generate up to `requested` raw candidates
    pub fn generate(
        &self,
        region: &RegionSnapshot,
        exclusion: &[ExclusionSite],
        requested: usize,
        seed: u64,
    ) -> GenerationReport {
        let sub_regions = region.effective_sub_regions();
        let mut state = GenerationState {
            report: GenerationReport {
                requested,
                ..Default::default()
            },
            per_sub_region: HashMap::new(),
            cap: self.sub_region_cap(requested, sub_regions.len()),
        };

        if requested == 0 {
            return state.report;
        }

        let settlement_slots = (requested as f64 * self.config.settlement_mix).round() as usize;
        self.settlement_phase(region, &sub_regions, exclusion, settlement_slots, &mut state);

        // Slots the settlements could not fill go to grid exploration
        let grid_slots = requested.saturating_sub(state.report.candidates.len());
        self.grid_phase(region, &sub_regions, exclusion, grid_slots, seed, &mut state);

        debug!(
            region = %region.key,
            requested,
            generated = state.report.candidates.len(),
            settlements = state.report.settlement_count,
            grid = state.report.grid_count,
            off_land = state.report.rejected_off_land,
            exclusion = state.report.rejected_exclusion,
            capped = state.report.rejected_sub_region_cap,
            "Candidate generation finished"
        );

        state.report
    }

    fn settlement_phase(
        &self,
        region: &RegionSnapshot,
        sub_regions: &[SubRegion],
        exclusion: &[ExclusionSite],
        slots: usize,
        state: &mut GenerationState,
    ) {
        let mut settlements: Vec<_> = region
            .settlements
            .iter()
            .filter(|s| s.population >= self.config.min_settlement_population)
            .collect();
        settlements.sort_by(|a, b| b.population.cmp(&a.population).then_with(|| a.id.cmp(&b.id)));

        let mut accepted = 0;
        for settlement in settlements {
            if accepted >= slots {
                break;
            }
            let id = format!("stl-{}", settlement.id);
            let admitted = self.try_admit(
                region,
                sub_regions,
                exclusion,
                id,
                settlement.location,
                SourceType::Settlement,
                state,
            );
            if admitted {
                accepted += 1;
                state.report.settlement_count += 1;
            }
        }
    }

    fn grid_phase(
        &self,
        region: &RegionSnapshot,
        sub_regions: &[SubRegion],
        exclusion: &[ExclusionSite],
        slots: usize,
        seed: u64,
        state: &mut GenerationState,
    ) {
        if slots == 0 {
            return;
        }

        let bounds = &region.bounds;
        let center_lat = bounds.center().lat;
        let height_km = bounds.height_deg() * geo::KM_PER_DEG_LAT;
        let width_km = geo::haversine_km(center_lat, bounds.min_lng, center_lat, bounds.max_lng);

        // Twice as many cells as slots leaves room for off-land and excluded cells
        let cell_target = (slots * 2).max(1) as f64;
        let cell_km = ((height_km * width_km) / cell_target).sqrt().max(0.05);
        let rows = ((height_km / cell_km).ceil() as usize).max(1);
        let cols = ((width_km / cell_km).ceil() as usize).max(1);
        let cell_lat = bounds.height_deg() / rows as f64;
        let cell_lng = bounds.width_deg() / cols as f64;

        let mut rng = StdRng::seed_from_u64(seed);
        let mut cells: Vec<(usize, usize)> = (0..rows)
            .flat_map(|row| (0..cols).map(move |col| (row, col)))
            .collect();
        cells.shuffle(&mut rng);

        let jitter = self.config.grid_jitter;
        let mut accepted = 0;
        for (row, col) in cells {
            if accepted >= slots {
                break;
            }
            let (jlat, jlng) = if jitter > 0.0 {
                (rng.gen_range(-jitter..jitter), rng.gen_range(-jitter..jitter))
            } else {
                (0.0, 0.0)
            };
            let point = GeoPoint::new(
                bounds.min_lat + (row as f64 + 0.5 + jlat) * cell_lat,
                bounds.min_lng + (col as f64 + 0.5 + jlng) * cell_lng,
            );
            let id = format!("grid-r{}-c{}", row, col);
            if self.try_admit(region, sub_regions, exclusion, id, point, SourceType::Grid, state) {
                accepted += 1;
                state.report.grid_count += 1;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn try_admit(
        &self,
        region: &RegionSnapshot,
        sub_regions: &[SubRegion],
        exclusion: &[ExclusionSite],
        id: String,
        location: GeoPoint,
        source_type: SourceType,
        state: &mut GenerationState,
    ) -> bool {
        let (sub_region_key, location_quality) = match region.locate(sub_regions, &location) {
            LandCheck::Inside {
                sub_region_key,
                quality,
            } => (sub_region_key, quality),
            LandCheck::Outside => {
                state.report.reject(Rejection::OffLand);
                return false;
            }
        };

        let clearance = self.config.min_clearance_km;
        if exclusion
            .iter()
            .any(|site| site.location.distance_km(&location) < clearance)
        {
            state.report.reject(Rejection::ExclusionZone);
            return false;
        }

        let used = state.per_sub_region.entry(sub_region_key.clone()).or_insert(0);
        if *used >= state.cap {
            state.report.reject(Rejection::SubRegionCap);
            return false;
        }
        *used += 1;

        if location_quality.is_estimated() {
            state.report.estimated_location_count += 1;
        }
        let candidate = self.describe(region, id, location, source_type, sub_region_key, location_quality);
        state.report.candidates.push(candidate);
        true
    }

    /// Catchment attributes for an admitted point
    fn describe(
        &self,
        region: &RegionSnapshot,
        id: String,
        location: GeoPoint,
        source_type: SourceType,
        sub_region_key: String,
        location_quality: DataQuality,
    ) -> Candidate {
        let radius = self.config.catchment_radius_km;

        let mut population: u64 = 0;
        let mut population_quality: Option<DataQuality> = None;
        for settlement in &region.settlements {
            if settlement.location.distance_km(&location) <= radius {
                population += settlement.population;
                population_quality = Some(match population_quality {
                    Some(q) => q.combine(settlement.population_quality),
                    None => settlement.population_quality,
                });
            }
        }
        // No settlement in the catchment: zero is inferred, not measured
        let population_quality = population_quality.unwrap_or(DataQuality::Estimated);

        let area_km2 = std::f64::consts::PI * radius * radius;
        let density = population as f64 / area_km2;
        let urban_density_index = density / (density + self.config.density_half_saturation);

        Candidate {
            id,
            location,
            source_type,
            sub_region_key,
            estimated_population: population,
            urban_density_index,
            anchor_counts: self.anchors.counts_within(&location, radius),
            data_quality: AttributeQuality {
                location: location_quality,
                population: population_quality,
                urban_density: population_quality,
                anchors: region.poi_quality,
            },
        }
    }
}

struct GenerationState {
    report: GenerationReport,
    per_sub_region: HashMap<String, usize>,
    cap: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoundingBox, Settlement, SiteKind};

    fn region(settlements: Vec<Settlement>) -> RegionSnapshot {
        RegionSnapshot {
            key: "test".to_string(),
            name: "Test".to_string(),
            bounds: BoundingBox::new(45.0, 7.0, 46.0, 8.0),
            sub_regions: vec![],
            settlements,
            anchor_pois: vec![],
            poi_quality: DataQuality::Measured,
        }
    }

    fn settlement(id: &str, lat: f64, lng: f64, population: u64) -> Settlement {
        Settlement {
            id: id.to_string(),
            name: String::new(),
            location: GeoPoint::new(lat, lng),
            population,
            population_quality: DataQuality::Measured,
        }
    }

    #[test]
    fn test_settlements_first_by_population() {
        let config = GenerationConfig::default();
        let anchors = AnchorIndex::default();
        let generator = CandidateGenerator::new(&config, &anchors);
        let region = region(vec![
            settlement("small", 45.2, 7.2, 1_000),
            settlement("big", 45.5, 7.5, 50_000),
            settlement("tiny", 45.8, 7.8, 100),
        ]);

        let report = generator.generate(&region, &[], 10, 1);
        assert_eq!(report.settlement_count, 2);
        assert_eq!(report.candidates[0].id, "stl-big");
        assert_eq!(report.candidates[1].id, "stl-small");
        assert_eq!(report.candidates.len(), 10);
        assert!(!report.under_produced());
    }

    #[test]
    fn test_exclusion_zone_rejects_settlement() {
        let config = GenerationConfig::default();
        let anchors = AnchorIndex::default();
        let generator = CandidateGenerator::new(&config, &anchors);
        let region = region(vec![settlement("big", 45.5, 7.5, 50_000)]);
        let sites = vec![ExclusionSite {
            id: "store-1".to_string(),
            location: GeoPoint::new(45.505, 7.5),
            kind: SiteKind::Existing,
        }];

        let report = generator.generate(&region, &sites, 5, 1);
        assert!(report.candidates.iter().all(|c| c.id != "stl-big"));
        assert!(report.rejected_exclusion >= 1);
        for candidate in &report.candidates {
            assert!(candidate.location.distance_km(&sites[0].location) >= config.min_clearance_km);
        }
    }

    #[test]
    fn test_same_seed_same_candidates() {
        let config = GenerationConfig::default();
        let anchors = AnchorIndex::default();
        let generator = CandidateGenerator::new(&config, &anchors);
        let region = region(vec![]);

        let a = generator.generate(&region, &[], 20, 7);
        let b = generator.generate(&region, &[], 20, 7);
        let ids_a: Vec<_> = a.candidates.iter().map(|c| (c.id.clone(), c.location)).collect();
        let ids_b: Vec<_> = b.candidates.iter().map(|c| (c.id.clone(), c.location)).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_empty_catchment_population_is_estimated() {
        let config = GenerationConfig::default();
        let anchors = AnchorIndex::default();
        let generator = CandidateGenerator::new(&config, &anchors);
        let report = generator.generate(&region(vec![]), &[], 5, 3);
        assert_eq!(report.grid_count, 5);
        for candidate in &report.candidates {
            assert_eq!(candidate.estimated_population, 0);
            assert_eq!(candidate.data_quality.population, DataQuality::Estimated);
            // Region without sub-regions only has its bounding box
            assert_eq!(candidate.data_quality.location, DataQuality::Estimated);
        }
    }

    #[test]
    fn test_sub_region_cap_never_below_even_split() {
        let config = GenerationConfig::default();
        let anchors = AnchorIndex::default();
        let generator = CandidateGenerator::new(&config, &anchors);
        assert_eq!(generator.sub_region_cap(100, 1), 100);
        assert_eq!(generator.sub_region_cap(100, 5), 40);
        assert_eq!(generator.sub_region_cap(100, 2), 50);
    }

    #[test]
    fn test_zero_requested() {
        let config = GenerationConfig::default();
        let anchors = AnchorIndex::default();
        let generator = CandidateGenerator::new(&config, &anchors);
        let report = generator.generate(&region(vec![]), &[], 0, 3);
        assert!(report.candidates.is_empty());
        assert!(!report.under_produced());
    }
}
