use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use shared::{Coordinate, Gender, GenderPreference, RidePreferences};

use crate::config::MatchingConfig;
use crate::error::MatchingError;
use crate::geohash::GeohashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    Scheduled,
    Ongoing,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RideStatus::Scheduled => "SCHEDULED",
            RideStatus::Ongoing => "ONGOING",
            RideStatus::Completed => "COMPLETED",
            RideStatus::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for RideStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(RideStatus::Scheduled),
            "ONGOING" => Ok(RideStatus::Ongoing),
            "COMPLETED" => Ok(RideStatus::Completed),
            "CANCELLED" => Ok(RideStatus::Cancelled),
            other => Err(format!("unknown ride status {other:?}")),
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Pending and accepted bookings hold seats against the ride capacity.
    pub fn holds_seats(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Accepted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Accepted => "ACCEPTED",
            BookingStatus::Rejected => "REJECTED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Completed => "COMPLETED",
        }
    }
}

/// A ride offered by a driver, with its precomputed spatial index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ride {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub origin: Coordinate,
    pub destination: Coordinate,
    pub origin_address: Option<String>,
    pub destination_address: Option<String>,
    pub polyline: String,
    /// Written once at creation, never recomputed.
    pub geohashes: GeohashSet,
    pub route_distance_km: f64,
    pub departure_time: DateTime<Utc>,
    pub total_seats: u32,
    pub price_per_seat: f64,
    pub status: RideStatus,
    pub preferences: RidePreferences,
    pub created_at: DateTime<Utc>,
}

/// Validated input for inserting a ride.
#[derive(Debug, Clone)]
pub struct NewRide {
    pub driver_id: Uuid,
    pub origin: Coordinate,
    pub destination: Coordinate,
    pub origin_address: Option<String>,
    pub destination_address: Option<String>,
    pub polyline: String,
    pub geohashes: GeohashSet,
    pub route_distance_km: f64,
    pub departure_time: DateTime<Utc>,
    pub total_seats: u32,
    pub price_per_seat: f64,
    pub preferences: RidePreferences,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub passenger_id: Uuid,
    pub seats_booked: u32,
    pub pickup: Coordinate,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

/// A marketplace member; anyone can both drive and ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub rating: f64,
    pub company: Option<String>,
    pub gender: Option<Gender>,
    pub total_rides_as_driver: u32,
}

impl User {
    pub fn driver_summary(&self) -> DriverSummary {
        DriverSummary {
            user_id: self.id,
            rating: self.rating,
            company: self.company.clone(),
            total_rides_as_driver: self.total_rides_as_driver,
            gender: self.gender,
        }
    }

    pub fn passenger_profile(&self) -> PassengerProfile {
        PassengerProfile {
            user_id: self.id,
            company: self.company.clone(),
            gender: self.gender,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverSummary {
    pub user_id: Uuid,
    pub rating: f64,
    pub company: Option<String>,
    pub total_rides_as_driver: u32,
    pub gender: Option<Gender>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassengerProfile {
    pub user_id: Uuid,
    pub company: Option<String>,
    pub gender: Option<Gender>,
}

/// A validated search with all defaults applied.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub passenger_id: Uuid,
    pub origin: Coordinate,
    pub destination: Coordinate,
    pub departure_time: DateTime<Utc>,
    pub seats: u32,
    pub max_deviation_km: f64,
    /// Earliest acceptable departure, `departure_time - window`.
    pub departs_after: DateTime<Utc>,
    /// Latest acceptable departure, `departure_time + window`.
    pub departs_before: DateTime<Utc>,
    pub same_company_only: bool,
    pub gender_preference: GenderPreference,
}

impl SearchQuery {
    pub fn from_request(
        passenger_id: Uuid,
        req: shared::SearchRequest,
        config: &MatchingConfig,
    ) -> Result<Self, MatchingError> {
        let origin = Coordinate::new(
            required(req.start_lat, "startLat")?,
            required(req.start_lng, "startLng")?,
        );
        let destination = Coordinate::new(
            required(req.end_lat, "endLat")?,
            required(req.end_lng, "endLng")?,
        );
        let departure_time = required(req.departure_time, "departureTime")?;

        for (name, coord) in [("start", origin), ("end", destination)] {
            if !coord.is_valid() {
                return Err(MatchingError::Input(format!(
                    "{name} coordinate out of range: ({}, {})",
                    coord.lat, coord.lng
                )));
            }
        }

        let seats = req.seats.unwrap_or(config.default_seats);
        if seats == 0 {
            return Err(MatchingError::Input("seats must be at least 1".into()));
        }

        let max_deviation_km = req.max_deviation_km.unwrap_or(config.default_max_deviation_km);
        if !max_deviation_km.is_finite() || max_deviation_km <= 0.0 {
            return Err(MatchingError::Input(
                "maxDeviationKm must be a positive number".into(),
            ));
        }

        let window_minutes = req
            .time_window_minutes
            .unwrap_or(config.default_time_window_minutes);
        if !(0..=24 * 60).contains(&window_minutes) {
            return Err(MatchingError::Input(
                "timeWindowMinutes must be between 0 and 1440".into(),
            ));
        }
        let window = TimeDelta::minutes(window_minutes);
        let (Some(departs_after), Some(departs_before)) = (
            departure_time.checked_sub_signed(window),
            departure_time.checked_add_signed(window),
        ) else {
            return Err(MatchingError::Input("departureTime out of range".into()));
        };

        Ok(Self {
            passenger_id,
            origin,
            destination,
            departure_time,
            seats,
            max_deviation_km,
            departs_after,
            departs_before,
            same_company_only: req.same_company_only.unwrap_or(false),
            gender_preference: req.gender_preference.unwrap_or_default(),
        })
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, MatchingError> {
    value.ok_or_else(|| MatchingError::Input(format!("{field} is required")))
}

/// A candidate ride that survived the deviation and seat filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    #[serde(flatten)]
    pub ride: Ride,
    pub driver: DriverSummary,
    pub start_distance: f64,
    pub end_distance: f64,
    pub total_deviation: f64,
    pub actual_available_seats: u32,
    pub match_score: f64,
}

/// A ride together with its live seat availability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideDetails {
    #[serde(flatten)]
    pub ride: Ride,
    pub actual_available_seats: u32,
}
