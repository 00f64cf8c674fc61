//! Candidate retrieval: the cheap, index-only narrowing that runs before any
//! distance is computed.

use crate::config::{LookupStrategy, MatchingConfig};
use crate::error::MatchingError;
use crate::geohash::{self, GeohashError, GeohashSet, Precision};
use crate::models::{Coordinate, PassengerProfile, Ride, SearchQuery};
use crate::store::{RideFilter, RideStore};

/// Rings needed to reach `radius_km` from a cell center, at least 1.
pub fn lookup_rings(radius_km: f64, latitude: f64, precision: Precision, max_rings: u32) -> u32 {
    let (width, height) = geohash::cell_dimensions_km(precision, latitude);
    let side = width.min(height);
    if side.is_nan() || side <= 0.0 || !radius_km.is_finite() {
        return max_rings.max(1);
    }
    let rings = (radius_km / side).ceil();
    (rings.min(f64::from(max_rings)) as u32).max(1)
}

/// Cells to probe around `center`.
///
/// With `LookupStrategy::FixedNeighbors` this is always the 9-cell block
/// around the center whatever `radius_km` is: larger radii under-cover and
/// smaller ones over-cover. `ScaledRings` grows the block with the radius.
pub fn lookup_cells(
    center: Coordinate,
    radius_km: f64,
    config: &MatchingConfig,
) -> Result<GeohashSet, GeohashError> {
    let rings = match config.lookup {
        LookupStrategy::FixedNeighbors => 1,
        LookupStrategy::ScaledRings => lookup_rings(
            radius_km,
            center.lat,
            config.index_precision,
            config.max_lookup_rings,
        ),
    };
    geohash::cells_around(center, rings, config.index_precision)
}

/// The store filter for a search: time window, seat floor, spatial overlap
/// with either endpoint, and the optional driver preferences.
pub fn candidate_filter(
    query: &SearchQuery,
    passenger: &PassengerProfile,
    config: &MatchingConfig,
) -> Result<RideFilter, MatchingError> {
    let origin_cells = lookup_cells(query.origin, query.max_deviation_km, config)?;
    let destination_cells = lookup_cells(query.destination, query.max_deviation_km, config)?;

    // A passenger without an employer cannot ask for colleagues only; the
    // flag is ignored rather than matching nothing.
    let company_eq = if query.same_company_only {
        passenger.company.clone()
    } else {
        None
    };

    Ok(RideFilter {
        departs_after: Some(query.departs_after),
        departs_before: Some(query.departs_before),
        min_seats: query.seats,
        geohash_in: Some(origin_cells.union(destination_cells)),
        company_eq,
        gender_eq: query.gender_preference.required_gender(),
        limit: None,
    })
}

/// Scheduled rides whose route index touches the search endpoints. No
/// distances are computed here; false positives are expected and pruned by
/// the deviation filter.
pub async fn find_candidates(
    store: &dyn RideStore,
    query: &SearchQuery,
    passenger: &PassengerProfile,
    config: &MatchingConfig,
) -> Result<Vec<Ride>, MatchingError> {
    let filter = candidate_filter(query, passenger, config)?;
    let rides = store.list_scheduled_rides(&filter).await?;
    tracing::debug!(
        passenger = %query.passenger_id,
        cells = filter.geohash_in.as_ref().map_or(0, GeohashSet::len),
        candidates = rides.len(),
        "retrieved candidates"
    );
    Ok(rides)
}
