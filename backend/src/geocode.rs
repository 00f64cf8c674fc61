//! Address lookup, injected into the HTTP layer so tests never hit the
//! network.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::GeocoderConfig;
use crate::models::Coordinate;

const USER_AGENT: &str = concat!("carpool-backend/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Nominatim's fair use policy allows one request per second.
const MIN_REQUEST_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("geocoder request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected geocoder response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Best match for a free-form address, `None` when nothing matched.
    async fn geocode(&self, query: &str) -> Result<Option<Coordinate>, GeocodeError>;
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

impl NominatimPlace {
    fn coordinate(&self) -> Result<Coordinate, GeocodeError> {
        let parse = |value: &str| {
            value
                .parse::<f64>()
                .map_err(|err| GeocodeError::InvalidResponse(format!("bad coordinate {value:?}: {err}")))
        };
        let coord = Coordinate::new(parse(&self.lat)?, parse(&self.lon)?);
        if !coord.is_valid() {
            return Err(GeocodeError::InvalidResponse(format!(
                "coordinate out of range: ({}, {})",
                coord.lat, coord.lng
            )));
        }
        Ok(coord)
    }
}

/// Client for the OpenStreetMap Nominatim search API.
pub struct NominatimGeocoder {
    client: reqwest::Client,
    endpoint: String,
    country_codes: String,
    last_request: Mutex<Option<Instant>>,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocoderConfig) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: config.base_url.trim_end_matches('/').to_string(),
            country_codes: config.country_codes.clone(),
            last_request: Mutex::new(None),
        })
    }

    /// Sleeps until a request slot is free. The lock is held across the
    /// sleep so concurrent callers queue up one second apart.
    async fn wait_for_slot(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + MIN_REQUEST_INTERVAL;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, query: &str) -> Result<Option<Coordinate>, GeocodeError> {
        self.wait_for_slot().await;

        let places: Vec<NominatimPlace> = self
            .client
            .get(format!("{}/search", self.endpoint))
            .query(&[
                ("q", query),
                ("format", "json"),
                ("limit", "1"),
                ("countrycodes", self.country_codes.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match places.first() {
            Some(place) => {
                let coord = place.coordinate()?;
                tracing::info!(query, lat = coord.lat, lng = coord.lng, "geocoded address");
                Ok(Some(coord))
            }
            None => {
                tracing::warn!(query, "no geocoding result");
                Ok(None)
            }
        }
    }
}
