//! Region snapshots and the exclusion set
//!
//! A [`RegionSnapshot`] is everything the pure pipeline needs to know about a
//! region: land boundary (per sub-region), settlements with population, and
//! anchor points of interest. Providers load it once per job.

use serde::{Deserialize, Serialize};

use super::candidate::DataQuality;
use crate::utils::geo;

/// WGS84 coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle distance in kilometres
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        geo::haversine_km(self.lat, self.lng, other.lat, other.lng)
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

/// Axis-aligned lat/lng box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, min_lng: f64, max_lat: f64, max_lng: f64) -> Self {
        Self {
            min_lat,
            min_lng,
            max_lat,
            max_lng,
        }
    }

    /// Finite, non-degenerate and within WGS84 ranges
    pub fn is_valid(&self) -> bool {
        let finite = [self.min_lat, self.min_lng, self.max_lat, self.max_lng]
            .iter()
            .all(|v| v.is_finite());
        finite
            && self.min_lat < self.max_lat
            && self.min_lng < self.max_lng
            && self.min_lat >= -90.0
            && self.max_lat <= 90.0
            && self.min_lng >= -180.0
            && self.max_lng <= 180.0
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lng >= self.min_lng
            && point.lng <= self.max_lng
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    pub fn height_deg(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn width_deg(&self) -> f64 {
        self.max_lng - self.min_lng
    }
}

/// Closed polygon ring (first vertex need not be repeated)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub ring: Vec<GeoPoint>,
}

impl Polygon {
    pub fn new(ring: Vec<GeoPoint>) -> Self {
        Self { ring }
    }

    /// Rectangle polygon covering `bounds`
    pub fn from_bounds(bounds: &BoundingBox) -> Self {
        Self::new(vec![
            GeoPoint::new(bounds.min_lat, bounds.min_lng),
            GeoPoint::new(bounds.min_lat, bounds.max_lng),
            GeoPoint::new(bounds.max_lat, bounds.max_lng),
            GeoPoint::new(bounds.max_lat, bounds.min_lng),
        ])
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        geo::point_in_ring(point, &self.ring)
    }
}

/// Administrative sub-region (the unit of fairness and generation caps)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubRegion {
    pub key: String,
    #[serde(default)]
    pub name: String,
    pub bounds: BoundingBox,
    /// Land boundary; `None` when boundary data is missing for this sub-region
    #[serde(default)]
    pub boundary: Option<Polygon>,
}

/// Settlement with a population figure (anchors settlement-sourced candidates)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub location: GeoPoint,
    pub population: u64,
    #[serde(default)]
    pub population_quality: DataQuality,
}

/// Anchor point-of-interest category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorCategory {
    Grocery,
    Transit,
    School,
    Office,
    Retail,
    Leisure,
}

impl AnchorCategory {
    pub const ALL: [AnchorCategory; 6] = [
        AnchorCategory::Grocery,
        AnchorCategory::Transit,
        AnchorCategory::School,
        AnchorCategory::Office,
        AnchorCategory::Retail,
        AnchorCategory::Leisure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorCategory::Grocery => "grocery",
            AnchorCategory::Transit => "transit",
            AnchorCategory::School => "school",
            AnchorCategory::Office => "office",
            AnchorCategory::Retail => "retail",
            AnchorCategory::Leisure => "leisure",
        }
    }
}

/// Raw anchor POI listing (may contain duplicate listings of one place)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorPoi {
    pub id: String,
    pub category: AnchorCategory,
    pub location: GeoPoint,
}

/// Everything the pipeline reads about one region
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionSnapshot {
    pub key: String,
    #[serde(default)]
    pub name: String,
    pub bounds: BoundingBox,
    #[serde(default)]
    pub sub_regions: Vec<SubRegion>,
    #[serde(default)]
    pub settlements: Vec<Settlement>,
    #[serde(default)]
    pub anchor_pois: Vec<AnchorPoi>,
    /// Quality of the POI coverage for this region
    #[serde(default)]
    pub poi_quality: DataQuality,
}

/// Result of testing a point against the region's land mask
#[derive(Debug, Clone, PartialEq)]
pub enum LandCheck {
    Inside {
        sub_region_key: String,
        quality: DataQuality,
    },
    Outside,
}

impl RegionSnapshot {
    /// Sub-regions used for land checks and caps
    ///
    /// A region without sub-regions is treated as a single sub-region with
    /// no boundary data (bounding-box check only).
    pub fn effective_sub_regions(&self) -> Vec<SubRegion> {
        if self.sub_regions.is_empty() {
            vec![SubRegion {
                key: self.key.clone(),
                name: self.name.clone(),
                bounds: self.bounds,
                boundary: None,
            }]
        } else {
            self.sub_regions.clone()
        }
    }

    /// Locate `point` on the land mask
    ///
    /// Sub-regions with a boundary polygon give a `Measured` answer; those
    /// without fall back to their bounding box and answer `Estimated`.
    pub fn locate(&self, sub_regions: &[SubRegion], point: &GeoPoint) -> LandCheck {
        if !point.is_finite() || !self.bounds.contains(point) {
            return LandCheck::Outside;
        }

        for sub_region in sub_regions {
            if !sub_region.bounds.contains(point) {
                continue;
            }
            match &sub_region.boundary {
                Some(polygon) => {
                    if polygon.contains(point) {
                        return LandCheck::Inside {
                            sub_region_key: sub_region.key.clone(),
                            quality: DataQuality::Measured,
                        };
                    }
                }
                None => {
                    return LandCheck::Inside {
                        sub_region_key: sub_region.key.clone(),
                        quality: DataQuality::Estimated,
                    };
                }
            }
        }

        LandCheck::Outside
    }
}

/// Kind of exclusion-set entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteKind {
    /// Operating store
    Existing,
    /// Suggestion promoted to a committed future site
    Planned,
}

impl SiteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteKind::Existing => "existing",
            SiteKind::Planned => "planned",
        }
    }
}

impl std::str::FromStr for SiteKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "existing" => Ok(SiteKind::Existing),
            "planned" => Ok(SiteKind::Planned),
            other => Err(format!("unknown site kind: {}", other)),
        }
    }
}

/// Existing or planned site that new candidates must keep clear of
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExclusionSite {
    pub id: String,
    pub location: GeoPoint,
    pub kind: SiteKind,
}
