//! Geodesic helpers
//!
//! Distances are great-circle (haversine) on a spherical Earth. That is
//! accurate to well under 1% at the scales the pipeline works with.

use crate::models::GeoPoint;

/// Mean Earth radius in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometres per degree of latitude
pub const KM_PER_DEG_LAT: f64 = 111.32;

/// Haversine distance between two points in kilometres
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1_rad.cos() * lat2_rad.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Degrees of latitude spanned by `km`
pub fn km_to_lat_deg(km: f64) -> f64 {
    km / KM_PER_DEG_LAT
}

/// Degrees of longitude spanned by `km` at latitude `lat`
pub fn km_to_lng_deg(km: f64, lat: f64) -> f64 {
    let cos_lat = lat.to_radians().cos().abs().max(1e-6);
    km / (KM_PER_DEG_LAT * cos_lat)
}

/// Even-odd ray casting (lng as x, lat as y)
///
/// Points exactly on an edge may land on either side.
pub fn point_in_ring(point: &GeoPoint, ring: &[GeoPoint]) -> bool {
    if ring.len() < 3 {
        return false;
    }

    let (x, y) = (point.lng, point.lat);
    let mut inside = false;
    let mut j = ring.len() - 1;

    for i in 0..ring.len() {
        let (xi, yi) = (ring[i].lng, ring[i].lat);
        let (xj, yj) = (ring[j].lng, ring[j].lat);

        if (yi > y) != (yj > y) {
            let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
            if x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }

    inside
}

/// Arithmetic centroid of a set of points
pub fn centroid(points: &[GeoPoint]) -> Option<GeoPoint> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let lat = points.iter().map(|p| p.lat).sum::<f64>() / n;
    let lng = points.iter().map(|p| p.lng).sum::<f64>() / n;
    Some(GeoPoint::new(lat, lng))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_one_degree_latitude() {
        let d = haversine_km(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111.19).abs() < 0.1, "got {}", d);
    }

    #[test]
    fn test_haversine_zero_and_symmetric() {
        assert_eq!(haversine_km(45.0, 7.0, 45.0, 7.0), 0.0);
        let a = haversine_km(45.0, 7.0, 46.0, 8.0);
        let b = haversine_km(46.0, 8.0, 45.0, 7.0);
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn test_degree_offsets_round_trip_distance() {
        let lat = 48.0;
        let dlat = km_to_lat_deg(10.0);
        let dlng = km_to_lng_deg(10.0, lat);
        let north = haversine_km(lat, 2.0, lat + dlat, 2.0);
        let east = haversine_km(lat, 2.0, lat, 2.0 + dlng);
        assert!((north - 10.0).abs() < 0.1, "north {}", north);
        assert!((east - 10.0).abs() < 0.1, "east {}", east);
    }

    #[test]
    fn test_point_in_square() {
        let ring = vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(1.0, 0.0),
        ];
        assert!(point_in_ring(&GeoPoint::new(0.5, 0.5), &ring));
        assert!(!point_in_ring(&GeoPoint::new(1.5, 0.5), &ring));
        assert!(!point_in_ring(&GeoPoint::new(0.5, -0.1), &ring));
    }

    #[test]
    fn test_degenerate_ring() {
        let ring = vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)];
        assert!(!point_in_ring(&GeoPoint::new(0.5, 0.5), &ring));
    }

    #[test]
    fn test_centroid() {
        assert!(centroid(&[]).is_none());
        let c = centroid(&[GeoPoint::new(0.0, 0.0), GeoPoint::new(2.0, 4.0)]).unwrap();
        assert_eq!(c, GeoPoint::new(1.0, 2.0));
    }
}
