//! Anchor POI deduplication
//!
//! Raw POI feeds list the same place several times (a supermarket as both
//! "grocery" and "grocery store", a station per platform). Same-category
//! listings within the coincidence radius merge into one anchor so duplicates
//! never inflate density.

use std::collections::BTreeMap;

use crate::models::{AnchorCategory, AnchorPoi, GeoPoint};

/// One merged anchor
#[derive(Debug, Clone)]
pub struct AnchorCluster {
    pub category: AnchorCategory,
    /// Location of the first listing merged into this cluster
    pub location: GeoPoint,
    pub member_ids: Vec<String>,
}

/// Merged anchors for a region
#[derive(Debug, Clone, Default)]
pub struct AnchorIndex {
    clusters: Vec<AnchorCluster>,
    raw_count: usize,
}

impl AnchorIndex {
    /// Merge `pois` with the given coincidence radius (metres)
    ///
    /// Listings are visited in (category, id) order so the result does not
    /// depend on feed order.
    pub fn build(pois: &[AnchorPoi], coincidence_radius_m: f64) -> Self {
        let radius_km = coincidence_radius_m / 1000.0;
        let mut ordered: Vec<&AnchorPoi> = pois.iter().filter(|p| p.location.is_finite()).collect();
        ordered.sort_by(|a, b| a.category.cmp(&b.category).then_with(|| a.id.cmp(&b.id)));

        let mut clusters: Vec<AnchorCluster> = Vec::new();
        for poi in ordered {
            let existing = clusters.iter_mut().find(|c| {
                c.category == poi.category && c.location.distance_km(&poi.location) <= radius_km
            });
            match existing {
                Some(cluster) => cluster.member_ids.push(poi.id.clone()),
                None => clusters.push(AnchorCluster {
                    category: poi.category,
                    location: poi.location,
                    member_ids: vec![poi.id.clone()],
                }),
            }
        }

        Self {
            clusters,
            raw_count: pois.len(),
        }
    }

    pub fn clusters(&self) -> &[AnchorCluster] {
        &self.clusters
    }

    /// Listings before merging
    pub fn raw_count(&self) -> usize {
        self.raw_count
    }

    /// Distinct anchors after merging
    pub fn merged_count(&self) -> usize {
        self.clusters.len()
    }

    /// Distinct anchors by category within `radius_km` of `point`
    pub fn counts_within(&self, point: &GeoPoint, radius_km: f64) -> BTreeMap<AnchorCategory, u32> {
        let mut counts = BTreeMap::new();
        for cluster in &self.clusters {
            if cluster.location.distance_km(point) <= radius_km {
                *counts.entry(cluster.category).or_insert(0) += 1;
            }
        }
        counts
    }
}
