//! Raw and scored candidates

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::region::{AnchorCategory, GeoPoint};

/// Whether a value came from authoritative data or was inferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    #[default]
    Measured,
    Estimated,
}

impl DataQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataQuality::Measured => "measured",
            DataQuality::Estimated => "estimated",
        }
    }

    pub fn is_estimated(&self) -> bool {
        matches!(self, DataQuality::Estimated)
    }

    /// Estimated if either input is estimated
    pub fn combine(self, other: DataQuality) -> DataQuality {
        if self.is_estimated() || other.is_estimated() {
            DataQuality::Estimated
        } else {
            DataQuality::Measured
        }
    }
}

/// How a candidate was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Anchored on a known settlement
    Settlement,
    /// Grid exploration point
    Grid,
}

/// Per-attribute data quality flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeQuality {
    /// Land-mask check (estimated when only a bounding box was available)
    pub location: DataQuality,
    pub population: DataQuality,
    pub urban_density: DataQuality,
    pub anchors: DataQuality,
}

/// Proposed geographic point for a new site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Stable identifier (also the NMS tie-breaker)
    pub id: String,
    pub location: GeoPoint,
    pub source_type: SourceType,
    /// Sub-region the candidate falls in
    pub sub_region_key: String,
    pub estimated_population: u64,
    /// Catchment population density, normalized to [0, 1]
    pub urban_density_index: f64,
    /// Anchor POI counts after coincident listings were merged
    pub anchor_counts: BTreeMap<AnchorCategory, u32>,
    pub data_quality: AttributeQuality,
}

impl Candidate {
    pub fn total_anchors(&self) -> u32 {
        self.anchor_counts.values().sum()
    }

    /// Number of anchor categories with at least one POI
    pub fn anchor_diversity(&self) -> usize {
        self.anchor_counts.values().filter(|c| **c > 0).count()
    }
}

/// Independently-sourced score component
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreComponentKind {
    Population,
    ProximityGap,
    AnchorDensity,
    PerformancePotential,
}

impl ScoreComponentKind {
    pub const ALL: [ScoreComponentKind; 4] = [
        ScoreComponentKind::Population,
        ScoreComponentKind::ProximityGap,
        ScoreComponentKind::AnchorDensity,
        ScoreComponentKind::PerformancePotential,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreComponentKind::Population => "population",
            ScoreComponentKind::ProximityGap => "proximity_gap",
            ScoreComponentKind::AnchorDensity => "anchor_density",
            ScoreComponentKind::PerformancePotential => "performance_potential",
        }
    }

    /// Human-readable label used in rationale text
    pub fn label(&self) -> &'static str {
        match self {
            ScoreComponentKind::Population => "population",
            ScoreComponentKind::ProximityGap => "distance to nearest site",
            ScoreComponentKind::AnchorDensity => "anchor density",
            ScoreComponentKind::PerformancePotential => "performance potential",
        }
    }
}

/// One line of the per-candidate score breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentScore {
    pub kind: ScoreComponentKind,
    /// Unnormalized input (residents, km, POI count, index); `None` when absent
    pub raw_value: Option<f64>,
    /// Normalized component score in [0, 1]
    pub score: f64,
    pub quality: DataQuality,
    /// Configured weight share before quality capping
    pub nominal_weight: f64,
    /// Weight share actually applied
    pub effective_weight: f64,
    /// `effective_weight * score`
    pub contribution: f64,
}

/// Candidate with fused score and audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    /// Fused confidence score in [0, 1]
    pub total_score: f64,
    pub breakdown: Vec<ComponentScore>,
    /// Fraction of components backed by measured data
    pub completeness_score: f64,
    /// Fairness region (sub-region key)
    pub region_key: String,
}

impl ScoredCandidate {
    pub fn id(&self) -> &str {
        &self.candidate.id
    }

    pub fn location(&self) -> GeoPoint {
        self.candidate.location
    }

    pub fn component(&self, kind: ScoreComponentKind) -> Option<&ComponentScore> {
        self.breakdown.iter().find(|c| c.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_combine() {
        use DataQuality::*;
        assert_eq!(Measured.combine(Measured), Measured);
        assert_eq!(Measured.combine(Estimated), Estimated);
        assert_eq!(Estimated.combine(Measured), Estimated);
    }

    #[test]
    fn test_anchor_totals() {
        let mut counts = BTreeMap::new();
        counts.insert(AnchorCategory::Grocery, 3);
        counts.insert(AnchorCategory::Transit, 0);
        counts.insert(AnchorCategory::School, 2);
        let candidate = Candidate {
            id: "c1".to_string(),
            location: GeoPoint::new(0.0, 0.0),
            source_type: SourceType::Grid,
            sub_region_key: "r".to_string(),
            estimated_population: 0,
            urban_density_index: 0.0,
            anchor_counts: counts,
            data_quality: AttributeQuality {
                location: DataQuality::Measured,
                population: DataQuality::Estimated,
                urban_density: DataQuality::Estimated,
                anchors: DataQuality::Measured,
            },
        };
        assert_eq!(candidate.total_anchors(), 5);
        assert_eq!(candidate.anchor_diversity(), 2);
    }
}
