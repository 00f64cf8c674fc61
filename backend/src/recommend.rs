//! "Recommended for you" feed.
//!
//! Passengers with ride history get rides near the centroid of their recent
//! pickups; everyone else (including unknown ids) gets the plain
//! rating/time ordered listing. No deviation scoring happens here.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::MatchingConfig;
use crate::error::MatchingError;
use crate::models::{Coordinate, Ride};
use crate::retrieval::lookup_cells;
use crate::store::{RideFilter, RideStore};

/// Mean latitude and longitude of `points`.
pub fn centroid(points: &[Coordinate]) -> Option<Coordinate> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let (lat, lng) = points
        .iter()
        .fold((0.0, 0.0), |(lat, lng), p| (lat + p.lat, lng + p.lng));
    Some(Coordinate::new(lat / n, lng / n))
}

/// Missing or zero falls back to the default; anything else is capped.
pub fn effective_limit(requested: Option<usize>, config: &MatchingConfig) -> usize {
    match requested {
        None | Some(0) => config.default_recommend_limit,
        Some(n) => n.min(config.max_recommend_limit),
    }
}

pub async fn recommend(
    store: &dyn RideStore,
    passenger_id: Uuid,
    limit: Option<usize>,
    now: DateTime<Utc>,
    config: &MatchingConfig,
) -> Result<Vec<Ride>, MatchingError> {
    let limit = effective_limit(limit, config);
    let pickups = store
        .recent_completed_pickups(passenger_id, config.recommend_history)
        .await?;

    let mut filter = RideFilter {
        departs_after: Some(now),
        limit: Some(limit),
        ..RideFilter::default()
    };

    match centroid(&pickups) {
        Some(center) => {
            tracing::debug!(
                passenger = %passenger_id,
                pickups = pickups.len(),
                lat = center.lat,
                lng = center.lng,
                "recommending around pickup centroid"
            );
            filter.geohash_in = Some(lookup_cells(center, config.recommend_radius_km, config)?);
        }
        None => {
            tracing::debug!(passenger = %passenger_id, "no ride history, listing upcoming rides");
        }
    }

    Ok(store.list_scheduled_rides(&filter).await?)
}
