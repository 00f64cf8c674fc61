use std::f64::consts::PI;

use crate::models::Coordinate;

pub const EARTH_RADIUS_KM: f64 = 6_371.0;
/// Length of one degree of latitude (great-circle arc).
pub const KM_PER_DEGREE: f64 = PI * EARTH_RADIUS_KM / 180.0;

/// Length of a path as the sum of its great-circle segments.
pub fn approximate_distance_km(path: &[Coordinate]) -> f64 {
    path.windows(2).map(|w| haversine_km(w[0], w[1])).sum()
}

pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlng = (dlng / 2.0).sin();

    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlng * sin_dlng;
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Point `distance_km` away from `origin` along `bearing_deg` (clockwise from north).
pub fn destination_point(origin: Coordinate, bearing_deg: f64, distance_km: f64) -> Coordinate {
    let angular = distance_km / EARTH_RADIUS_KM;
    let bearing = bearing_deg.to_radians();
    let lat1 = origin.lat.to_radians();
    let lng1 = origin.lng.to_radians();

    let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
    let lng2 = lng1
        + (bearing.sin() * angular.sin() * lat1.cos()).atan2(angular.cos() - lat1.sin() * lat2.sin());

    Coordinate::new(
        lat2.to_degrees(),
        (lng2.to_degrees() + 540.0).rem_euclid(360.0) - 180.0,
    )
}
