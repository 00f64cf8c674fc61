//! Deviation filter and match scoring.
//!
//! ```text
//! score = base
//!       - start_km * start_distance_per_km
//!       - end_km   * end_distance_per_km
//!       - minutes  * time_per_minute
//!       + rating   * rating
//!       + affinity
//! clamped to >= 0
//! ```
//!
//! Affinity is `same_company_bonus` when driver and passenger share an
//! employer (two missing employers count as shared), plus `veteran_bonus` above `veteran_threshold` rides as driver or
//! else `experienced_bonus` above `experienced_threshold`.

use std::cmp::Ordering;

use crate::models::{DriverSummary, MatchResult, PassengerProfile, Ride, SearchQuery};
use crate::routing::haversine_km;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub base: f64,
    pub start_distance_per_km: f64,
    pub end_distance_per_km: f64,
    pub time_per_minute: f64,
    pub rating: f64,
    pub same_company_bonus: f64,
    pub veteran_bonus: f64,
    pub veteran_threshold: u32,
    pub experienced_bonus: f64,
    pub experienced_threshold: u32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            base: 100.0,
            start_distance_per_km: 5.0,
            end_distance_per_km: 5.0,
            time_per_minute: 0.5,
            rating: 10.0,
            same_company_bonus: 15.0,
            veteran_bonus: 10.0,
            veteran_threshold: 50,
            experienced_bonus: 5.0,
            experienced_threshold: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    pub start_distance_km: f64,
    pub end_distance_km: f64,
    pub time_diff_minutes: f64,
    pub driver_rating: f64,
    pub same_company: bool,
    pub driver_rides: u32,
}

pub fn affinity_bonus(weights: &ScoringWeights, same_company: bool, driver_rides: u32) -> f64 {
    let company = if same_company {
        weights.same_company_bonus
    } else {
        0.0
    };
    let experience = if driver_rides > weights.veteran_threshold {
        weights.veteran_bonus
    } else if driver_rides > weights.experienced_threshold {
        weights.experienced_bonus
    } else {
        0.0
    };
    company + experience
}

pub fn match_score(inputs: &ScoreInputs, weights: &ScoringWeights) -> f64 {
    let score = weights.base
        - inputs.start_distance_km * weights.start_distance_per_km
        - inputs.end_distance_km * weights.end_distance_per_km
        - inputs.time_diff_minutes * weights.time_per_minute
        + inputs.driver_rating * weights.rating
        + affinity_bonus(weights, inputs.same_company, inputs.driver_rides);
    // f64::max also maps a NaN score (corrupt rating) to 0.
    score.max(0.0)
}

/// A retrieved ride with the live data needed to score it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub ride: Ride,
    pub driver: DriverSummary,
    /// Seats held by pending and accepted bookings right now.
    pub booked_seats: u32,
}

fn same_company(driver: &DriverSummary, passenger: &PassengerProfile) -> bool {
    driver.company == passenger.company
}

/// Drop candidates that deviate too far or lack seats, score the rest and
/// return them best first.
pub fn score_and_filter(
    candidates: Vec<Candidate>,
    query: &SearchQuery,
    passenger: &PassengerProfile,
    weights: &ScoringWeights,
) -> Vec<MatchResult> {
    let max_total_deviation = 2.0 * query.max_deviation_km;

    let mut results: Vec<MatchResult> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let Candidate {
                ride,
                driver,
                booked_seats,
            } = candidate;

            let start_distance = haversine_km(query.origin, ride.origin);
            let end_distance = haversine_km(query.destination, ride.destination);
            let total_deviation = start_distance + end_distance;
            if total_deviation > max_total_deviation {
                tracing::trace!(ride = %ride.id, total_deviation, "dropped: deviation");
                return None;
            }

            let actual_available_seats = ride.total_seats.saturating_sub(booked_seats);
            if actual_available_seats < query.seats {
                tracing::trace!(ride = %ride.id, actual_available_seats, "dropped: seats");
                return None;
            }

            let time_diff_minutes = (ride.departure_time - query.departure_time)
                .num_milliseconds()
                .unsigned_abs() as f64
                / 60_000.0;
            let inputs = ScoreInputs {
                start_distance_km: start_distance,
                end_distance_km: end_distance,
                time_diff_minutes,
                driver_rating: driver.rating,
                same_company: same_company(&driver, passenger),
                driver_rides: driver.total_rides_as_driver,
            };
            let match_score = match_score(&inputs, weights);

            Some(MatchResult {
                ride,
                driver,
                start_distance,
                end_distance,
                total_deviation,
                actual_available_seats,
                match_score,
            })
        })
        .collect();

    results.sort_by(rank);
    results
}

/// Higher score first, then smaller deviation, then earlier departure. The
/// ride id settles anything left so the order is fully deterministic.
pub fn rank(a: &MatchResult, b: &MatchResult) -> Ordering {
    b.match_score
        .total_cmp(&a.match_score)
        .then_with(|| a.total_deviation.total_cmp(&b.total_deviation))
        .then_with(|| a.ride.departure_time.cmp(&b.ride.departure_time))
        .then_with(|| a.ride.id.cmp(&b.ride.id))
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::geohash::GeohashSet;
    use crate::models::{Coordinate, GenderPreference, RidePreferences, RideStatus};
    use crate::routing::destination_point;

    const KORAMANGALA: Coordinate = Coordinate {
        lat: 12.9716,
        lng: 77.5946,
    };
    const MANYATA: Coordinate = Coordinate {
        lat: 13.0358,
        lng: 77.6431,
    };

    fn nine_am() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn query(at: DateTime<Utc>) -> SearchQuery {
        SearchQuery {
            passenger_id: Uuid::new_v4(),
            origin: KORAMANGALA,
            destination: MANYATA,
            departure_time: at,
            seats: 1,
            max_deviation_km: 5.0,
            departs_after: at - TimeDelta::minutes(30),
            departs_before: at + TimeDelta::minutes(30),
            same_company_only: false,
            gender_preference: GenderPreference::Any,
        }
    }

    fn passenger(company: Option<&str>) -> PassengerProfile {
        PassengerProfile {
            user_id: Uuid::new_v4(),
            company: company.map(str::to_string),
            gender: None,
        }
    }

    fn candidate(origin: Coordinate, destination: Coordinate, rating: f64, company: &str) -> Candidate {
        let driver_id = Uuid::new_v4();
        Candidate {
            ride: Ride {
                id: Uuid::new_v4(),
                driver_id,
                origin,
                destination,
                origin_address: Some("Koramangala".into()),
                destination_address: Some("Manyata Tech Park".into()),
                polyline: String::new(),
                geohashes: GeohashSet::new(),
                route_distance_km: 0.0,
                departure_time: nine_am(),
                total_seats: 4,
                price_per_seat: 80.0,
                status: RideStatus::Scheduled,
                preferences: RidePreferences::default(),
                created_at: nine_am(),
            },
            driver: DriverSummary {
                user_id: driver_id,
                rating,
                company: Some(company.into()),
                total_rides_as_driver: 0,
                gender: None,
            },
            booked_seats: 0,
        }
    }

    #[test]
    fn exact_match_scores_by_formula() {
        let ride_a = candidate(KORAMANGALA, MANYATA, 4.8, "Acme");
        let results = score_and_filter(
            vec![ride_a],
            &query(nine_am() + TimeDelta::minutes(10)),
            &passenger(Some("Acme")),
            &ScoringWeights::default(),
        );
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert!(result.total_deviation.abs() < 1e-9);
        assert_eq!(result.actual_available_seats, 4);
        // 100 - 10 min * 0.5 + 4.8 * 10 + 15 (same company)
        assert!((result.match_score - 158.0).abs() < 1e-9);
    }

    #[test]
    fn affinity_tiers() {
        let w = ScoringWeights::default();
        assert_eq!(affinity_bonus(&w, false, 20), 0.0);
        assert_eq!(affinity_bonus(&w, false, 21), 5.0);
        assert_eq!(affinity_bonus(&w, false, 50), 5.0);
        assert_eq!(affinity_bonus(&w, false, 51), 10.0);
        assert_eq!(affinity_bonus(&w, true, 51), 25.0);
    }

    #[test]
    fn missing_companies_count_as_the_same_company() {
        let mut c = candidate(KORAMANGALA, MANYATA, 4.0, "Acme");
        c.driver.company = None;
        let results = score_and_filter(
            vec![c.clone()],
            &query(nine_am()),
            &passenger(None),
            &ScoringWeights::default(),
        );
        assert!((results[0].match_score - 155.0).abs() < 1e-9);

        let results = score_and_filter(
            vec![c],
            &query(nine_am()),
            &passenger(Some("Acme")),
            &ScoringWeights::default(),
        );
        assert!((results[0].match_score - 140.0).abs() < 1e-9);
    }

    #[test]
    fn score_is_clamped_at_zero() {
        let inputs = ScoreInputs {
            start_distance_km: 40.0,
            end_distance_km: 40.0,
            time_diff_minutes: 300.0,
            driver_rating: 1.0,
            same_company: false,
            driver_rides: 0,
        };
        assert_eq!(match_score(&inputs, &ScoringWeights::default()), 0.0);
        let corrupt = ScoreInputs {
            driver_rating: f64::NAN,
            ..inputs
        };
        assert_eq!(match_score(&corrupt, &ScoringWeights::default()), 0.0);
    }

    #[test]
    fn fully_booked_ride_is_dropped() {
        let mut full = candidate(KORAMANGALA, MANYATA, 4.8, "Acme");
        full.booked_seats = 4;
        let results = score_and_filter(
            vec![full],
            &query(nine_am()),
            &passenger(Some("Acme")),
            &ScoringWeights::default(),
        );
        assert!(results.is_empty());
    }

    #[test]
    fn overbooked_ride_reports_zero_not_negative() {
        let mut over = candidate(KORAMANGALA, MANYATA, 4.8, "Acme");
        over.booked_seats = 9;
        assert_eq!(over.ride.total_seats.saturating_sub(over.booked_seats), 0);
        let results = score_and_filter(
            vec![over],
            &query(nine_am()),
            &passenger(None),
            &ScoringWeights::default(),
        );
        assert!(results.is_empty());
    }

    #[test]
    fn far_endpoints_exceed_deviation_budget() {
        let ride_b = candidate(
            destination_point(KORAMANGALA, 180.0, 8.0),
            destination_point(MANYATA, 0.0, 8.0),
            5.0,
            "Acme",
        );
        let results = score_and_filter(
            vec![ride_b],
            &query(nine_am()),
            &passenger(Some("Acme")),
            &ScoringWeights::default(),
        );
        assert!(results.is_empty());
    }

    #[test]
    fn deviation_just_inside_budget_is_kept() {
        let near = candidate(
            destination_point(KORAMANGALA, 90.0, 4.9),
            destination_point(MANYATA, 270.0, 4.9),
            4.0,
            "Acme",
        );
        let results = score_and_filter(
            vec![near],
            &query(nine_am()),
            &passenger(None),
            &ScoringWeights::default(),
        );
        assert_eq!(results.len(), 1);
        assert!((results[0].total_deviation - 9.8).abs() < 1e-6);
    }

    #[test]
    fn ranking_prefers_rating_and_company() {
        let best = candidate(KORAMANGALA, MANYATA, 4.8, "Acme");
        let lower_rating = candidate(KORAMANGALA, MANYATA, 4.2, "Acme");
        let other_company = candidate(KORAMANGALA, MANYATA, 4.8, "Globex");
        let best_id = best.ride.id;
        let results = score_and_filter(
            vec![other_company, lower_rating, best],
            &query(nine_am() + TimeDelta::minutes(10)),
            &passenger(Some("Acme")),
            &ScoringWeights::default(),
        );
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].ride.id, best_id);
        assert!(results.windows(2).all(|w| w[0].match_score >= w[1].match_score));
    }

    #[test]
    fn ties_break_on_deviation_then_departure() {
        let weights = ScoringWeights {
            start_distance_per_km: 0.0,
            end_distance_per_km: 0.0,
            time_per_minute: 0.0,
            ..ScoringWeights::default()
        };
        let exact = candidate(KORAMANGALA, MANYATA, 4.0, "Acme");
        let offset = candidate(destination_point(KORAMANGALA, 0.0, 1.0), MANYATA, 4.0, "Acme");
        let mut exact_later = candidate(KORAMANGALA, MANYATA, 4.0, "Acme");
        exact_later.ride.departure_time = nine_am() + TimeDelta::minutes(5);

        let ids = (exact.ride.id, exact_later.ride.id, offset.ride.id);
        let results = score_and_filter(
            vec![offset, exact_later, exact],
            &query(nine_am()),
            &passenger(None),
            &weights,
        );
        let order: Vec<Uuid> = results.iter().map(|r| r.ride.id).collect();
        assert_eq!(order, vec![ids.0, ids.1, ids.2]);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_score_is_never_negative(
                start in 0.0..500.0f64,
                end in 0.0..500.0f64,
                minutes in 0.0..2_000.0f64,
                rating in 0.0..5.0f64,
                same_company in any::<bool>(),
                rides in 0u32..200
            ) {
                let inputs = ScoreInputs {
                    start_distance_km: start,
                    end_distance_km: end,
                    time_diff_minutes: minutes,
                    driver_rating: rating,
                    same_company,
                    driver_rides: rides,
                };
                prop_assert!(match_score(&inputs, &ScoringWeights::default()) >= 0.0);
            }

            #[test]
            fn prop_larger_deviation_budget_never_drops_results(
                offsets in prop::collection::vec((0.0..360.0f64, 0.0..12.0f64, 0.0..12.0f64), 1..12),
                small in 0.5..6.0f64,
                extra in 0.0..6.0f64
            ) {
                let candidates: Vec<Candidate> = offsets
                    .iter()
                    .map(|(bearing, start_km, end_km)| {
                        candidate(
                            destination_point(KORAMANGALA, *bearing, *start_km),
                            destination_point(MANYATA, *bearing, *end_km),
                            4.0,
                            "Acme",
                        )
                    })
                    .collect();
                let mut narrow = query(nine_am());
                narrow.max_deviation_km = small;
                let mut wide = narrow.clone();
                wide.max_deviation_km = small + extra;

                let weights = ScoringWeights::default();
                let who = passenger(None);
                let narrow_ids: Vec<Uuid> = score_and_filter(candidates.clone(), &narrow, &who, &weights)
                    .iter()
                    .map(|r| r.ride.id)
                    .collect();
                let wide_ids: Vec<Uuid> = score_and_filter(candidates, &wide, &who, &weights)
                    .iter()
                    .map(|r| r.ride.id)
                    .collect();
                prop_assert!(narrow_ids.iter().all(|id| wide_ids.contains(id)));
            }
        }
    }
}
