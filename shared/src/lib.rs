use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn interpolate(self, other: Self, t: f64) -> Self {
        Self {
            lat: self.lat + (other.lat - self.lat) * t,
            lng: self.lng + (other.lng - self.lng) * t,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenderPreference {
    Male,
    Female,
    #[default]
    Any,
}

impl GenderPreference {
    /// The driver gender a preference narrows to, `None` for `Any`.
    pub fn required_gender(self) -> Option<Gender> {
        match self {
            GenderPreference::Male => Some(Gender::Male),
            GenderPreference::Female => Some(Gender::Female),
            GenderPreference::Any => None,
        }
    }
}

/// Body of `POST /api/search`.
///
/// Coordinates and the departure time are required; they are optional here so
/// that a missing field is reported as a validation error instead of a
/// deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub start_lat: Option<f64>,
    pub start_lng: Option<f64>,
    pub end_lat: Option<f64>,
    pub end_lng: Option<f64>,
    pub departure_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seats: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_deviation_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window_minutes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_company_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender_preference: Option<GenderPreference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RidePreferences {
    #[serde(default)]
    pub same_company_only: bool,
    #[serde(default)]
    pub gender_preference: GenderPreference,
    #[serde(default)]
    pub smoking_allowed: bool,
    #[serde(default)]
    pub pets_allowed: bool,
    #[serde(default = "default_music_allowed")]
    pub music_allowed: bool,
}

impl Default for RidePreferences {
    fn default() -> Self {
        Self {
            same_company_only: false,
            gender_preference: GenderPreference::Any,
            smoking_allowed: false,
            pets_allowed: false,
            music_allowed: true,
        }
    }
}

fn default_music_allowed() -> bool {
    true
}

/// Body of `POST /api/rides`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRideRequest {
    pub start_lat: f64,
    pub start_lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_address: Option<String>,
    pub end_lat: f64,
    pub end_lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_address: Option<String>,
    pub polyline: String,
    pub departure_time: DateTime<Utc>,
    pub available_seats: u32,
    #[serde(default)]
    pub price_per_seat: f64,
    #[serde(default)]
    pub preferences: RidePreferences,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_request_uses_camel_case_and_tolerates_missing_optionals() {
        let json = r#"{
            "startLat": 12.9716,
            "startLng": 77.5946,
            "endLat": 13.0358,
            "endLng": 77.6431,
            "departureTime": "2026-03-02T09:10:00Z",
            "genderPreference": "FEMALE"
        }"#;
        let req: SearchRequest = serde_json::from_str(json).expect("valid request");
        assert_eq!(req.start_lat, Some(12.9716));
        assert_eq!(req.seats, None);
        assert_eq!(req.gender_preference, Some(GenderPreference::Female));
    }

    #[test]
    fn ride_preferences_default_allows_music() {
        let prefs: RidePreferences = serde_json::from_str("{}").expect("empty preferences");
        assert_eq!(prefs, RidePreferences::default());
        assert!(prefs.music_allowed);
    }

    #[test]
    fn coordinate_range_check() {
        assert!(Coordinate::new(90.0, -180.0).is_valid());
        assert!(!Coordinate::new(90.5, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, f64::NAN).is_valid());
    }
}
