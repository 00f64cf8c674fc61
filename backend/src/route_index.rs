//! Spatial index written once per ride: the set of cells its route touches.
//!
//! Every sampled route point contributes its cell and the eight neighbors.
//! Consecutive polyline vertices can be far apart (overview polylines drop
//! intermediate points on straight roads), so segments are densified first:
//! no step moves more than half a cell on either axis, which keeps every
//! point on the segment within one cell of a sampled point.

use crate::error::MatchingError;
use crate::geohash::{self, GeohashError, GeohashSet, Precision};
use crate::models::Coordinate;
use crate::polyline::decode_polyline;

/// Upper bound on interpolated points per segment.
const MAX_STEPS_PER_SEGMENT: usize = 4_096;

/// Decode `polyline` and index the cells its route covers.
///
/// An empty polyline yields an empty set; a single point yields its cell and
/// neighbors.
pub fn build_route_index(polyline: &str, precision: Precision) -> Result<GeohashSet, MatchingError> {
    let points = decode_polyline(polyline)?;
    Ok(index_path(&points, precision)?)
}

/// Coverage stored on a ride: the route plus its declared endpoints, which
/// may not coincide with the first and last polyline vertices.
pub fn ride_coverage(
    points: &[Coordinate],
    origin: Coordinate,
    destination: Coordinate,
    precision: Precision,
) -> Result<GeohashSet, GeohashError> {
    let mut set = index_path(points, precision)?;
    for endpoint in [origin, destination] {
        set.insert_with_neighbors(geohash::encode(endpoint, precision)?);
    }
    Ok(set)
}

pub fn index_path(points: &[Coordinate], precision: Precision) -> Result<GeohashSet, GeohashError> {
    let mut set = GeohashSet::new();
    let Some(first) = points.first() else {
        return Ok(set);
    };
    set.insert_with_neighbors(geohash::encode(*first, precision)?);

    let (lat_step, lng_step) = geohash::cell_size_degrees(precision);
    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let steps = segment_steps(a, b, lat_step / 2.0, lng_step / 2.0);
        for i in 1..=steps {
            let t = i as f64 / steps as f64;
            set.insert_with_neighbors(geohash::encode(a.interpolate(b, t), precision)?);
        }
    }

    Ok(set)
}

fn segment_steps(a: Coordinate, b: Coordinate, max_dlat: f64, max_dlng: f64) -> usize {
    let by_lat = (b.lat - a.lat).abs() / max_dlat;
    let by_lng = (b.lng - a.lng).abs() / max_dlng;
    let steps = by_lat.max(by_lng).ceil();
    if steps.is_finite() {
        (steps as usize).clamp(1, MAX_STEPS_PER_SEGMENT)
    } else {
        1
    }
}
