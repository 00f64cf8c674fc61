use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use shared::ApiError;
use uuid::Uuid;

use crate::geocode::GeocodeError;
use crate::geohash::GeohashError;
use crate::polyline::PolylineError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum MatchingError {
    #[error("{0}")]
    Input(String),
    #[error("invalid geohash input: {0}")]
    Geohash(#[from] GeohashError),
    #[error("malformed polyline: {0}")]
    Polyline(#[from] PolylineError),
    #[error("passenger {0} not found")]
    PassengerNotFound(Uuid),
    #[error("ride {0} not found")]
    RideNotFound(Uuid),
    #[error("no location found for {0:?}")]
    AddressNotFound(String),
    #[error("ride store error: {0}")]
    Store(#[from] StoreError),
    #[error("geocoder error: {0}")]
    Geocode(#[from] GeocodeError),
    #[error("request exceeded its {0:?} deadline")]
    Timeout(Duration),
}

impl MatchingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            MatchingError::Input(_) | MatchingError::Geohash(_) | MatchingError::Polyline(_) => {
                StatusCode::BAD_REQUEST
            }
            MatchingError::PassengerNotFound(_)
            | MatchingError::RideNotFound(_)
            | MatchingError::AddressNotFound(_) => StatusCode::NOT_FOUND,
            MatchingError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            MatchingError::Geocode(_) => StatusCode::BAD_GATEWAY,
            MatchingError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for MatchingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        } else {
            tracing::debug!("request rejected: {self}");
        }
        let body = Json(ApiError {
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}
