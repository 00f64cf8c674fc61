//! Request-level orchestration of search, recommendation and ride creation.
//!
//! Every store round-trip of a request runs under `MatchingConfig::request_timeout`.
//! On expiry the in-flight future is dropped, which cancels the underlying
//! query, and the caller gets `MatchingError::Timeout`.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::{CreateRideRequest, SearchRequest};
use uuid::Uuid;

use crate::config::MatchingConfig;
use crate::error::MatchingError;
use crate::models::{Coordinate, MatchResult, NewRide, Ride, RideDetails, SearchQuery};
use crate::polyline::decode_polyline;
use crate::recommend;
use crate::retrieval::find_candidates;
use crate::route_index::ride_coverage;
use crate::routing::approximate_distance_km;
use crate::scoring::{Candidate, score_and_filter};
use crate::store::RideStore;

pub struct MatchingService {
    store: Arc<dyn RideStore>,
    config: MatchingConfig,
}

impl MatchingService {
    pub fn new(store: Arc<dyn RideStore>, config: MatchingConfig) -> Self {
        Self { store, config }
    }

    /// Rides matching `request`, best first. An empty list is a normal outcome.
    pub async fn search(
        &self,
        passenger_id: Uuid,
        request: SearchRequest,
    ) -> Result<Vec<MatchResult>, MatchingError> {
        let query = SearchQuery::from_request(passenger_id, request, &self.config)?;
        self.with_deadline(self.run_search(query)).await
    }

    async fn run_search(&self, query: SearchQuery) -> Result<Vec<MatchResult>, MatchingError> {
        let passenger = self
            .store
            .get_passenger(query.passenger_id)
            .await?
            .ok_or(MatchingError::PassengerNotFound(query.passenger_id))?;

        let rides = find_candidates(self.store.as_ref(), &query, &passenger, &self.config).await?;
        let candidates = self.load_candidates(rides).await?;
        let retrieved = candidates.len();
        let results = score_and_filter(candidates, &query, &passenger, &self.config.weights);

        tracing::info!(
            passenger = %query.passenger_id,
            retrieved,
            matched = results.len(),
            "search completed"
        );
        Ok(results)
    }

    /// Attach live booked seats and driver summaries to each ride, two
    /// batched store reads regardless of candidate count.
    async fn load_candidates(&self, rides: Vec<Ride>) -> Result<Vec<Candidate>, MatchingError> {
        if rides.is_empty() {
            return Ok(Vec::new());
        }

        let ride_ids: Vec<Uuid> = rides.iter().map(|r| r.id).collect();
        let mut seen = HashSet::new();
        let driver_ids: Vec<Uuid> = rides
            .iter()
            .map(|r| r.driver_id)
            .filter(|id| seen.insert(*id))
            .collect();

        let booked = self.store.active_booked_seats_for(&ride_ids).await?;
        let drivers = self.store.driver_summaries_for(&driver_ids).await?;

        Ok(rides
            .into_iter()
            .filter_map(|ride| {
                let Some(driver) = drivers.get(&ride.driver_id).cloned() else {
                    tracing::warn!(ride = %ride.id, driver = %ride.driver_id, "driver summary missing");
                    return None;
                };
                let booked_seats = booked.get(&ride.id).copied().unwrap_or(0);
                Some(Candidate {
                    ride,
                    driver,
                    booked_seats,
                })
            })
            .collect())
    }

    pub async fn recommend(
        &self,
        passenger_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<Ride>, MatchingError> {
        self.recommend_at(passenger_id, limit, Utc::now()).await
    }

    pub async fn recommend_at(
        &self,
        passenger_id: Uuid,
        limit: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Ride>, MatchingError> {
        self.with_deadline(recommend::recommend(
            self.store.as_ref(),
            passenger_id,
            limit,
            now,
            &self.config,
        ))
        .await
    }

    /// Validate, index and persist a new ride. The geohash coverage is
    /// computed here once and never again.
    pub async fn create_ride(
        &self,
        driver_id: Uuid,
        request: CreateRideRequest,
    ) -> Result<Ride, MatchingError> {
        let origin = Coordinate::new(request.start_lat, request.start_lng);
        let destination = Coordinate::new(request.end_lat, request.end_lng);
        for (name, coord) in [("start", origin), ("end", destination)] {
            if !coord.is_valid() {
                return Err(MatchingError::Input(format!(
                    "{name} coordinate out of range: ({}, {})",
                    coord.lat, coord.lng
                )));
            }
        }
        if request.available_seats == 0 {
            return Err(MatchingError::Input(
                "availableSeats must be at least 1".into(),
            ));
        }
        if !request.price_per_seat.is_finite() || request.price_per_seat < 0.0 {
            return Err(MatchingError::Input(
                "pricePerSeat must be zero or more".into(),
            ));
        }

        let points = decode_polyline(&request.polyline)?;
        let geohashes = ride_coverage(&points, origin, destination, self.config.index_precision)?;
        let route_distance_km = if points.len() >= 2 {
            approximate_distance_km(&points)
        } else {
            approximate_distance_km(&[origin, destination])
        };

        let new_ride = NewRide {
            driver_id,
            origin,
            destination,
            origin_address: request.start_address,
            destination_address: request.end_address,
            polyline: request.polyline,
            geohashes,
            route_distance_km,
            departure_time: request.departure_time,
            total_seats: request.available_seats,
            price_per_seat: request.price_per_seat,
            preferences: request.preferences,
        };

        let ride = self
            .with_deadline(async {
                self.store
                    .insert_ride(new_ride)
                    .await
                    .map_err(MatchingError::from)
            })
            .await?;
        tracing::info!(
            ride = %ride.id,
            driver = %driver_id,
            cells = ride.geohashes.len(),
            "ride created"
        );
        Ok(ride)
    }

    pub async fn ride_details(&self, ride_id: Uuid) -> Result<RideDetails, MatchingError> {
        self.with_deadline(async {
            let ride = self
                .store
                .get_ride(ride_id)
                .await?
                .ok_or(MatchingError::RideNotFound(ride_id))?;
            let booked = self.store.count_active_booked_seats(ride_id).await?;
            Ok::<_, MatchingError>(RideDetails {
                actual_available_seats: ride.total_seats.saturating_sub(booked),
                ride,
            })
        })
        .await
    }

    async fn with_deadline<T, F>(&self, fut: F) -> Result<T, MatchingError>
    where
        F: Future<Output = Result<T, MatchingError>>,
    {
        let limit = self.config.request_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(?limit, "request deadline exceeded");
                Err(MatchingError::Timeout(limit))
            }
        }
    }
}
