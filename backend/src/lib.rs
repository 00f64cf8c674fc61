pub mod config;
pub mod database;
pub mod error;
pub mod geocode;
pub mod geohash;
pub mod matching;
pub mod models;
pub mod polyline;
pub mod recommend;
pub mod retrieval;
pub mod route_index;
pub mod routing;
pub mod scoring;
pub mod store;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        FromRequestParts, Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, request::Parts},
    routing::{get, post},
};
use serde::Deserialize;
use shared::{CreateRideRequest, SearchRequest};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::error::MatchingError;
use crate::geocode::Geocoder;
use crate::matching::MatchingService;
use crate::models::{Coordinate, MatchResult, Ride, RideDetails};

/// Header carrying the authenticated caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MatchingService>,
    pub geocoder: Arc<dyn Geocoder>,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/search", post(search_handler))
        .route("/api/recommended", get(recommended_handler))
        .route("/api/rides", post(create_ride_handler))
        .route("/api/rides/:id", get(ride_handler))
        .route("/api/geocode", get(geocode_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Caller identity taken from the `x-user-id` header.
pub struct CallerId(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = MatchingError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| MatchingError::Input(format!("{USER_ID_HEADER} header is required")))?;
        raw.to_str()
            .ok()
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .map(CallerId)
            .ok_or_else(|| MatchingError::Input(format!("{USER_ID_HEADER} must be a UUID")))
    }
}

/// POST /api/search - Rides matching a passenger's trip, best first
async fn search_handler(
    State(state): State<AppState>,
    CallerId(passenger_id): CallerId,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<Vec<MatchResult>>, MatchingError> {
    let Json(req) = payload.map_err(|rejection| MatchingError::Input(rejection.body_text()))?;
    state.service.search(passenger_id, req).await.map(Json)
}

#[derive(Debug, Deserialize)]
struct RecommendParams {
    limit: Option<usize>,
}

/// GET /api/recommended?limit=N - Feed for a passenger without a concrete trip
async fn recommended_handler(
    State(state): State<AppState>,
    CallerId(passenger_id): CallerId,
    params: Result<Query<RecommendParams>, QueryRejection>,
) -> Result<Json<Vec<Ride>>, MatchingError> {
    let Query(params) = params.map_err(|rejection| MatchingError::Input(rejection.body_text()))?;
    state
        .service
        .recommend(passenger_id, params.limit)
        .await
        .map(Json)
}

/// POST /api/rides - Offer a ride; its route is indexed here
async fn create_ride_handler(
    State(state): State<AppState>,
    CallerId(driver_id): CallerId,
    payload: Result<Json<CreateRideRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Ride>), MatchingError> {
    let Json(req) = payload.map_err(|rejection| MatchingError::Input(rejection.body_text()))?;
    let ride = state.service.create_ride(driver_id, req).await?;
    Ok((StatusCode::CREATED, Json(ride)))
}

/// GET /api/rides/:id - A ride with its live seat availability
async fn ride_handler(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<RideDetails>, MatchingError> {
    let Path(id) = id.map_err(|rejection| MatchingError::Input(rejection.body_text()))?;
    state.service.ride_details(id).await.map(Json)
}

#[derive(Debug, Deserialize)]
struct GeocodeParams {
    q: String,
}

/// GET /api/geocode?q=... - Resolve an address to coordinates
async fn geocode_handler(
    State(state): State<AppState>,
    params: Result<Query<GeocodeParams>, QueryRejection>,
) -> Result<Json<Coordinate>, MatchingError> {
    let Query(params) = params.map_err(|rejection| MatchingError::Input(rejection.body_text()))?;
    let query = params.q.trim();
    if query.is_empty() {
        return Err(MatchingError::Input("q must not be empty".into()));
    }
    state
        .geocoder
        .geocode(query)
        .await?
        .map(Json)
        .ok_or_else(|| MatchingError::AddressNotFound(query.to_string()))
}

async fn health_handler() -> &'static str {
    "ok"
}
