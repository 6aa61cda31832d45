//! Region fixtures

use siteplan_expansion::models::{
    AnchorCategory, AnchorPoi, BoundingBox, DataQuality, GeoPoint, Polygon, RegionSnapshot,
    Settlement, SubRegion,
};

pub const SMALL_COUNTRY: &str = "small-country";

/// Roughly 130 km x 120 km with four quadrant sub-regions
///
/// The northern quadrants carry boundary polygons, the southern ones only
/// bounding boxes, so runs mix measured and estimated land checks. A 6 x 4
/// lattice of towns (about 22 km apart) each has a cluster of anchor POIs,
/// including one duplicate grocery listing per town.
pub fn small_country() -> RegionSnapshot {
    let bounds = BoundingBox::new(46.0, 6.0, 47.2, 7.6);

    let quadrant = |key: &str, min_lat: f64, min_lng: f64, with_boundary: bool| {
        let b = BoundingBox::new(min_lat, min_lng, min_lat + 0.6, min_lng + 0.8);
        SubRegion {
            key: key.to_string(),
            name: key.to_uppercase(),
            bounds: b,
            boundary: with_boundary.then(|| Polygon::from_bounds(&b)),
        }
    };
    let sub_regions = vec![
        quadrant("sc-nw", 46.6, 6.0, true),
        quadrant("sc-ne", 46.6, 6.8, true),
        quadrant("sc-sw", 46.0, 6.0, false),
        quadrant("sc-se", 46.0, 6.8, false),
    ];

    let mut settlements = Vec::new();
    let mut anchor_pois = Vec::new();
    for row in 0..6 {
        for col in 0..4 {
            let i = row * 4 + col;
            let location = GeoPoint::new(46.1 + row as f64 * 0.2, 6.1 + col as f64 * 0.4);
            settlements.push(Settlement {
                id: format!("town-{:02}", i),
                name: format!("Town {}", i),
                location,
                population: 4_000 + ((i as u64 * 7_919) % 60_000),
                population_quality: if i % 5 == 0 {
                    DataQuality::Estimated
                } else {
                    DataQuality::Measured
                },
            });

            for (k, category) in AnchorCategory::ALL.iter().enumerate().take(1 + i % 6) {
                anchor_pois.push(AnchorPoi {
                    id: format!("poi-{:02}-{}", i, k),
                    category: *category,
                    location: GeoPoint::new(
                        location.lat + 0.004 * k as f64,
                        location.lng - 0.004 * k as f64,
                    ),
                });
            }
            // Same grocery listed twice, a few metres apart
            anchor_pois.push(AnchorPoi {
                id: format!("poi-{:02}-dup", i),
                category: AnchorCategory::Grocery,
                location: GeoPoint::new(location.lat + 0.0001, location.lng),
            });
        }
    }

    RegionSnapshot {
        key: SMALL_COUNTRY.to_string(),
        name: "Small Country".to_string(),
        bounds,
        sub_regions,
        settlements,
        anchor_pois,
        poi_quality: DataQuality::Measured,
    }
}
