// Module database - PostgreSQL implementation of the ride store
// Candidate lookup relies on the GIN-indexed `rides.geohashes` array and the
// `&&` overlap operator; every optional filter is a `$n IS NULL OR ...` guard.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool};
use uuid::Uuid;

use crate::geohash::GeohashSet;
use crate::models::{
    Booking, Coordinate, DriverSummary, Gender, NewRide, PassengerProfile, Ride, RidePreferences,
    RideStatus, User,
};
use crate::store::{RideFilter, RideStore, StoreError};

const RIDE_COLUMNS: &str = "r.id, r.driver_id, r.origin_lat, r.origin_lng, r.destination_lat, \
     r.destination_lng, r.origin_address, r.destination_address, r.polyline, r.geohashes, \
     r.route_distance_km, r.departure_time, r.total_seats, r.price_per_seat, r.status, \
     r.preferences, r.created_at";

const USER_COLUMNS: &str = "id, name, rating, company, gender, total_rides_as_driver";

/// Ride row as stored
#[derive(Debug, FromRow)]
struct RideRow {
    id: Uuid,
    driver_id: Uuid,
    origin_lat: f64,
    origin_lng: f64,
    destination_lat: f64,
    destination_lng: f64,
    origin_address: Option<String>,
    destination_address: Option<String>,
    polyline: String,
    geohashes: Vec<String>,
    route_distance_km: f64,
    departure_time: DateTime<Utc>,
    total_seats: i32,
    price_per_seat: f64,
    status: String,
    preferences: Json<RidePreferences>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RideRow> for Ride {
    type Error = StoreError;

    fn try_from(row: RideRow) -> Result<Self, Self::Error> {
        let geohashes = GeohashSet::from_strings(&row.geohashes)
            .map_err(|e| StoreError::InvalidRecord(format!("ride {}: {e}", row.id)))?;
        let status = row
            .status
            .parse::<RideStatus>()
            .map_err(|e| StoreError::InvalidRecord(format!("ride {}: {e}", row.id)))?;
        Ok(Ride {
            id: row.id,
            driver_id: row.driver_id,
            origin: Coordinate::new(row.origin_lat, row.origin_lng),
            destination: Coordinate::new(row.destination_lat, row.destination_lng),
            origin_address: row.origin_address,
            destination_address: row.destination_address,
            polyline: row.polyline,
            geohashes,
            route_distance_km: row.route_distance_km,
            departure_time: row.departure_time,
            total_seats: non_negative(row.total_seats, "total_seats")?,
            price_per_seat: row.price_per_seat,
            status,
            preferences: row.preferences.0,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    rating: f64,
    company: Option<String>,
    gender: Option<String>,
    total_rides_as_driver: i32,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let gender = row.gender.as_deref().map(parse_gender).transpose()?;
        Ok(User {
            id: row.id,
            name: row.name,
            rating: row.rating,
            company: row.company,
            gender,
            total_rides_as_driver: non_negative(row.total_rides_as_driver, "total_rides_as_driver")?,
        })
    }
}

fn non_negative(value: i32, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::InvalidRecord(format!("{column} is negative: {value}")))
}

fn to_db_int(value: u32, column: &str) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::InvalidRecord(format!("{column} too large: {value}")))
}

fn gender_str(gender: Gender) -> &'static str {
    match gender {
        Gender::Male => "MALE",
        Gender::Female => "FEMALE",
        Gender::Other => "OTHER",
    }
}

fn parse_gender(raw: &str) -> Result<Gender, StoreError> {
    match raw {
        "MALE" => Ok(Gender::Male),
        "FEMALE" => Ok(Gender::Female),
        "OTHER" => Ok(Gender::Other),
        other => Err(StoreError::InvalidRecord(format!("unknown gender {other:?}"))),
    }
}

/// PostgreSQL connection pool
pub struct PgRideStore {
    pool: PgPool,
}

impl PgRideStore {
    /// Create new database connection pool
    ///
    /// # Errors
    /// Returns StoreError if the connection fails
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool created");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        // raw_sql accepts several statements, query() does not
        let mut conn = self.pool.acquire().await?;

        let migration_sql = include_str!("../migrations/20260301_create_carpool_schema.sql");

        sqlx::raw_sql(migration_sql).execute(&mut *conn).await?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    pub async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, rating, company, gender, total_rides_as_driver)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(user.rating)
        .bind(&user.company)
        .bind(user.gender.map(gender_str))
        .bind(to_db_int(user.total_rides_as_driver, "total_rides_as_driver")?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_booking(&self, booking: &Booking) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO bookings (id, ride_id, passenger_id, seats_booked, pickup_lat, pickup_lng, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(booking.id)
        .bind(booking.ride_id)
        .bind(booking.passenger_id)
        .bind(to_db_int(booking.seats_booked, "seats_booked")?)
        .bind(booking.pickup.lat)
        .bind(booking.pickup.lng)
        .bind(booking.status.as_str())
        .bind(booking.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }
}

#[async_trait]
impl RideStore for PgRideStore {
    async fn get_ride(&self, id: Uuid) -> Result<Option<Ride>, StoreError> {
        let row = sqlx::query_as::<_, RideRow>(&format!(
            "SELECT {RIDE_COLUMNS} FROM rides r WHERE r.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Ride::try_from).transpose()
    }

    async fn list_scheduled_rides(&self, filter: &RideFilter) -> Result<Vec<Ride>, StoreError> {
        let cells = filter.geohash_in.as_ref().map(GeohashSet::to_strings);
        let limit = filter
            .limit
            .map(|n| i64::try_from(n).unwrap_or(i64::MAX));

        let rows = sqlx::query_as::<_, RideRow>(&format!(
            r#"
            SELECT {RIDE_COLUMNS}
            FROM rides r
            JOIN users u ON u.id = r.driver_id
            WHERE r.status = 'SCHEDULED'
              AND ($1::timestamptz IS NULL OR r.departure_time >= $1)
              AND ($2::timestamptz IS NULL OR r.departure_time <= $2)
              AND r.total_seats >= $3
              AND ($4::text[] IS NULL OR r.geohashes && $4)
              AND ($5::text IS NULL OR u.company = $5)
              AND ($6::text IS NULL OR u.gender = $6)
            ORDER BY u.rating DESC, r.departure_time ASC, r.id ASC
            LIMIT $7
            "#
        ))
        .bind(filter.departs_after)
        .bind(filter.departs_before)
        .bind(i64::from(filter.min_seats))
        .bind(cells)
        .bind(&filter.company_eq)
        .bind(filter.gender_eq.map(gender_str))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!("Listed {} scheduled rides", rows.len());
        rows.into_iter().map(Ride::try_from).collect()
    }

    async fn count_active_booked_seats(&self, ride_id: Uuid) -> Result<u32, StoreError> {
        let seats: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(seats_booked), 0)::BIGINT
            FROM bookings
            WHERE ride_id = $1 AND status IN ('PENDING', 'ACCEPTED')
            "#,
        )
        .bind(ride_id)
        .fetch_one(&self.pool)
        .await?;
        u32::try_from(seats)
            .map_err(|_| StoreError::InvalidRecord(format!("booked seats out of range: {seats}")))
    }

    async fn active_booked_seats_for(
        &self,
        ride_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, u32>, StoreError> {
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT ride_id, SUM(seats_booked)::BIGINT
            FROM bookings
            WHERE ride_id = ANY($1) AND status IN ('PENDING', 'ACCEPTED')
            GROUP BY ride_id
            "#,
        )
        .bind(ride_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut seats: HashMap<Uuid, u32> = ride_ids.iter().map(|id| (*id, 0)).collect();
        for (ride_id, booked) in rows {
            let booked = u32::try_from(booked).map_err(|_| {
                StoreError::InvalidRecord(format!("booked seats out of range: {booked}"))
            })?;
            seats.insert(ride_id, booked);
        }
        Ok(seats)
    }

    async fn get_driver_summary(&self, user_id: Uuid) -> Result<Option<DriverSummary>, StoreError> {
        Ok(self.fetch_user(user_id).await?.map(|u| u.driver_summary()))
    }

    async fn driver_summaries_for(
        &self,
        user_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, DriverSummary>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)"
        ))
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| User::try_from(row).map(|user| (user.id, user.driver_summary())))
            .collect()
    }

    async fn get_passenger(&self, user_id: Uuid) -> Result<Option<PassengerProfile>, StoreError> {
        Ok(self.fetch_user(user_id).await?.map(|u| u.passenger_profile()))
    }

    async fn recent_completed_pickups(
        &self,
        passenger_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Coordinate>, StoreError> {
        let rows: Vec<(f64, f64)> = sqlx::query_as(
            r#"
            SELECT pickup_lat, pickup_lng
            FROM bookings
            WHERE passenger_id = $1 AND status = 'COMPLETED'
            ORDER BY created_at DESC, id ASC
            LIMIT $2
            "#,
        )
        .bind(passenger_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(lat, lng)| Coordinate::new(lat, lng))
            .collect())
    }

    async fn insert_ride(&self, ride: NewRide) -> Result<Ride, StoreError> {
        let row = sqlx::query_as::<_, RideRow>(&format!(
            r#"
            INSERT INTO rides AS r (
                driver_id, origin_lat, origin_lng, destination_lat, destination_lng,
                origin_address, destination_address, polyline, geohashes,
                route_distance_km, departure_time, total_seats, price_per_seat, preferences
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {RIDE_COLUMNS}
            "#
        ))
        .bind(ride.driver_id)
        .bind(ride.origin.lat)
        .bind(ride.origin.lng)
        .bind(ride.destination.lat)
        .bind(ride.destination.lng)
        .bind(&ride.origin_address)
        .bind(&ride.destination_address)
        .bind(&ride.polyline)
        .bind(ride.geohashes.to_strings())
        .bind(ride.route_distance_km)
        .bind(ride.departure_time)
        .bind(to_db_int(ride.total_seats, "total_seats")?)
        .bind(ride.price_per_seat)
        .bind(Json(&ride.preferences))
        .fetch_one(&self.pool)
        .await?;

        let ride = Ride::try_from(row)?;
        tracing::info!("Ride saved: {} ({} cells)", ride.id, ride.geohashes.len());
        Ok(ride)
    }
}
