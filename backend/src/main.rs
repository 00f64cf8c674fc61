use std::sync::Arc;

use backend::{
    AppState,
    config::AppConfig,
    create_router,
    database::PgRideStore,
    geocode::NominatimGeocoder,
    matching::MatchingService,
    store::{InMemoryRideStore, RideStore},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backend=debug,tower_http=info,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(
        precision = %config.matching.index_precision,
        lookup = ?config.matching.lookup,
        "matching configuration loaded"
    );

    let store: Arc<dyn RideStore> = match &config.database_url {
        Some(url) => {
            let db = PgRideStore::connect(url, config.database_max_connections).await?;
            db.migrate().await?;
            Arc::new(db)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory ride store");
            Arc::new(InMemoryRideStore::new())
        }
    };

    let state = AppState {
        service: Arc::new(MatchingService::new(store, config.matching.clone())),
        geocoder: Arc::new(NominatimGeocoder::new(&config.geocoder)?),
    };
    let app = create_router(state);

    tracing::info!("starting backend on http://{}", config.bind_addr);
    tracing::info!("  POST /api/search - Match rides for a trip");
    tracing::info!("  GET /api/recommended - Recommended rides");
    tracing::info!("  POST /api/rides - Offer a ride");
    tracing::info!("  GET /api/rides/:id - Ride with live seats");
    tracing::info!("  GET /api/geocode - Address lookup");

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
