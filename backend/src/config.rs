//! Environment-driven configuration.
//!
//! Route indexing (write path) and candidate lookup (read path) compare cells
//! as strings, so they must encode at the same precision or nothing ever
//! matches. Both paths read `MatchingConfig::index_precision`; there is no
//! second knob to drift out of sync.

use std::{env, net::SocketAddr, str::FromStr, time::Duration};

use crate::geohash::Precision;
use crate::scoring::ScoringWeights;

/// Precision used when indexing a ride route at creation time.
pub const ROUTE_INDEX_PRECISION: Precision = Precision::SIX;
/// Precision used when expanding a search point into lookup cells.
pub const LOOKUP_PRECISION: Precision = ROUTE_INDEX_PRECISION;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// How a search point is expanded into lookup cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStrategy {
    /// The containing cell plus its eight neighbors, whatever the radius.
    FixedNeighbors,
    /// `ceil(radius / smallest cell side)` rings, capped by `max_lookup_rings`.
    ScaledRings,
}

impl FromStr for LookupStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(LookupStrategy::FixedNeighbors),
            "scaled" => Ok(LookupStrategy::ScaledRings),
            other => Err(format!("expected \"fixed\" or \"scaled\", got {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub index_precision: Precision,
    pub lookup: LookupStrategy,
    pub max_lookup_rings: u32,
    pub default_seats: u32,
    pub default_max_deviation_km: f64,
    pub default_time_window_minutes: i64,
    pub recommend_radius_km: f64,
    pub recommend_history: usize,
    pub default_recommend_limit: usize,
    pub max_recommend_limit: usize,
    /// Deadline for the store round-trips of a single request.
    pub request_timeout: Duration,
    pub weights: ScoringWeights,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            index_precision: ROUTE_INDEX_PRECISION,
            lookup: LookupStrategy::FixedNeighbors,
            max_lookup_rings: 8,
            default_seats: 1,
            default_max_deviation_km: 5.0,
            default_time_window_minutes: 30,
            recommend_radius_km: 10.0,
            recommend_history: 5,
            default_recommend_limit: 10,
            max_recommend_limit: 100,
            request_timeout: Duration::from_secs(5),
            weights: ScoringWeights::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeocoderConfig {
    pub base_url: String,
    pub country_codes: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub matching: MatchingConfig,
    pub geocoder: GeocoderConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, so tests need not touch the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut matching = MatchingConfig::default();

        if let Some(raw) = lookup("GEOHASH_PRECISION") {
            let chars: u8 = parse("GEOHASH_PRECISION", &raw)?;
            matching.index_precision =
                Precision::new(chars).map_err(|err| invalid("GEOHASH_PRECISION", &raw, err))?;
        }
        if let Some(raw) = lookup("LOOKUP_STRATEGY") {
            matching.lookup = parse("LOOKUP_STRATEGY", &raw)?;
        }
        if let Some(raw) = lookup("SEARCH_TIMEOUT_MS") {
            let millis: u64 = parse("SEARCH_TIMEOUT_MS", &raw)?;
            if millis == 0 {
                return Err(invalid("SEARCH_TIMEOUT_MS", &raw, "must be positive"));
            }
            matching.request_timeout = Duration::from_millis(millis);
        }

        let bind_addr = match lookup("BIND_ADDR") {
            Some(raw) => parse("BIND_ADDR", &raw)?,
            None => parse("BIND_ADDR", DEFAULT_BIND_ADDR)?,
        };
        let database_max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => parse("DATABASE_MAX_CONNECTIONS", &raw)?,
            None => 5,
        };

        Ok(Self {
            bind_addr,
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            database_max_connections,
            matching,
            geocoder: GeocoderConfig {
                base_url: lookup("NOMINATIM_URL")
                    .unwrap_or_else(|| DEFAULT_NOMINATIM_URL.to_string()),
                country_codes: lookup("NOMINATIM_COUNTRY_CODES").unwrap_or_else(|| "in".into()),
            },
        })
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    raw.trim().parse().map_err(|err: T::Err| invalid(key, raw, err))
}

fn invalid(key: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
