//! Read/write access to rides, bookings and user summaries.
//!
//! The matching core only talks to `RideStore`. `PgRideStore` (see
//! `database.rs`) is the production implementation; `InMemoryRideStore`
//! backs tests and database-less runs with the same filter and ordering
//! semantics.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::geohash::GeohashSet;
use crate::models::{
    Booking, BookingStatus, Coordinate, DriverSummary, Gender, NewRide, PassengerProfile, Ride,
    RideStatus, User,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid stored record: {0}")]
    InvalidRecord(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Narrowing applied by `RideStore::list_scheduled_rides`. Unset fields do
/// not filter.
#[derive(Debug, Clone, Default)]
pub struct RideFilter {
    pub departs_after: Option<DateTime<Utc>>,
    pub departs_before: Option<DateTime<Utc>>,
    /// Compared against the ride's total seat count.
    pub min_seats: u32,
    /// Keep rides whose stored cells share at least one cell with this set.
    pub geohash_in: Option<GeohashSet>,
    pub company_eq: Option<String>,
    pub gender_eq: Option<Gender>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait RideStore: Send + Sync {
    async fn get_ride(&self, id: Uuid) -> Result<Option<Ride>, StoreError>;

    /// `SCHEDULED` rides matching `filter`, ordered by driver rating
    /// (descending), then departure time, then id. Rides whose driver is
    /// unknown are never returned.
    async fn list_scheduled_rides(&self, filter: &RideFilter) -> Result<Vec<Ride>, StoreError>;

    /// Seats held by `PENDING` and `ACCEPTED` bookings.
    async fn count_active_booked_seats(&self, ride_id: Uuid) -> Result<u32, StoreError>;

    async fn active_booked_seats_for(
        &self,
        ride_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, u32>, StoreError> {
        let mut seats = HashMap::with_capacity(ride_ids.len());
        for id in ride_ids {
            seats.insert(*id, self.count_active_booked_seats(*id).await?);
        }
        Ok(seats)
    }

    async fn get_driver_summary(&self, user_id: Uuid) -> Result<Option<DriverSummary>, StoreError>;

    async fn driver_summaries_for(
        &self,
        user_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, DriverSummary>, StoreError> {
        let mut summaries = HashMap::with_capacity(user_ids.len());
        for id in user_ids {
            if let Some(summary) = self.get_driver_summary(*id).await? {
                summaries.insert(*id, summary);
            }
        }
        Ok(summaries)
    }

    async fn get_passenger(&self, user_id: Uuid) -> Result<Option<PassengerProfile>, StoreError>;

    /// Pickup points of the passenger's `limit` most recent completed bookings.
    async fn recent_completed_pickups(
        &self,
        passenger_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Coordinate>, StoreError>;

    async fn insert_ride(&self, ride: NewRide) -> Result<Ride, StoreError>;
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    rides: HashMap<Uuid, Ride>,
    bookings: Vec<Booking>,
}

#[derive(Default)]
pub struct InMemoryRideStore {
    inner: RwLock<Inner>,
}

impl InMemoryRideStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: User) -> Result<(), StoreError> {
        self.write()?.users.insert(user.id, user);
        Ok(())
    }

    pub fn add_ride(&self, ride: Ride) -> Result<(), StoreError> {
        self.write()?.rides.insert(ride.id, ride);
        Ok(())
    }

    pub fn add_booking(&self, booking: Booking) -> Result<(), StoreError> {
        self.write()?.bookings.push(booking);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))
    }
}

impl Inner {
    fn booked_seats(&self, ride_id: Uuid) -> u32 {
        self.bookings
            .iter()
            .filter(|b| b.ride_id == ride_id && b.status.holds_seats())
            .map(|b| b.seats_booked)
            .sum()
    }

    fn matches(&self, ride: &Ride, driver: &User, filter: &RideFilter) -> bool {
        if ride.status != RideStatus::Scheduled || ride.total_seats < filter.min_seats {
            return false;
        }
        if filter.departs_after.is_some_and(|t| ride.departure_time < t)
            || filter.departs_before.is_some_and(|t| ride.departure_time > t)
        {
            return false;
        }
        if let Some(cells) = &filter.geohash_in {
            if !ride.geohashes.intersects(cells) {
                return false;
            }
        }
        if let Some(company) = &filter.company_eq {
            if driver.company.as_ref() != Some(company) {
                return false;
            }
        }
        if let Some(gender) = filter.gender_eq {
            if driver.gender != Some(gender) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl RideStore for InMemoryRideStore {
    async fn get_ride(&self, id: Uuid) -> Result<Option<Ride>, StoreError> {
        Ok(self.read()?.rides.get(&id).cloned())
    }

    async fn list_scheduled_rides(&self, filter: &RideFilter) -> Result<Vec<Ride>, StoreError> {
        let inner = self.read()?;
        let mut rides: Vec<(f64, &Ride)> = inner
            .rides
            .values()
            .filter_map(|ride| {
                let driver = inner.users.get(&ride.driver_id)?;
                inner
                    .matches(ride, driver, filter)
                    .then_some((driver.rating, ride))
            })
            .collect();

        rides.sort_by(|(rating_a, a), (rating_b, b)| {
            rating_b
                .total_cmp(rating_a)
                .then_with(|| a.departure_time.cmp(&b.departure_time))
                .then_with(|| a.id.cmp(&b.id))
        });
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(rides
            .into_iter()
            .take(limit)
            .map(|(_, ride)| ride.clone())
            .collect())
    }

    async fn count_active_booked_seats(&self, ride_id: Uuid) -> Result<u32, StoreError> {
        Ok(self.read()?.booked_seats(ride_id))
    }

    async fn get_driver_summary(&self, user_id: Uuid) -> Result<Option<DriverSummary>, StoreError> {
        Ok(self.read()?.users.get(&user_id).map(User::driver_summary))
    }

    async fn get_passenger(&self, user_id: Uuid) -> Result<Option<PassengerProfile>, StoreError> {
        Ok(self.read()?.users.get(&user_id).map(User::passenger_profile))
    }

    async fn recent_completed_pickups(
        &self,
        passenger_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Coordinate>, StoreError> {
        let inner = self.read()?;
        let mut completed: Vec<&Booking> = inner
            .bookings
            .iter()
            .filter(|b| b.passenger_id == passenger_id && b.status == BookingStatus::Completed)
            .collect();
        completed.sort_by(|a, b| match b.created_at.cmp(&a.created_at) {
            Ordering::Equal => a.id.cmp(&b.id),
            other => other,
        });
        Ok(completed.into_iter().take(limit).map(|b| b.pickup).collect())
    }

    async fn insert_ride(&self, ride: NewRide) -> Result<Ride, StoreError> {
        let ride = Ride {
            id: Uuid::new_v4(),
            driver_id: ride.driver_id,
            origin: ride.origin,
            destination: ride.destination,
            origin_address: ride.origin_address,
            destination_address: ride.destination_address,
            polyline: ride.polyline,
            geohashes: ride.geohashes,
            route_distance_km: ride.route_distance_km,
            departure_time: ride.departure_time,
            total_seats: ride.total_seats,
            price_per_seat: ride.price_per_seat,
            status: RideStatus::Scheduled,
            preferences: ride.preferences,
            created_at: Utc::now(),
        };
        self.write()?.rides.insert(ride.id, ride.clone());
        Ok(ride)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::geohash::{GeohashCell, Precision, cells_around};
    use crate::models::RidePreferences;

    fn user(rating: f64, company: Option<&str>, gender: Option<Gender>) -> User {
        User {
            id: Uuid::new_v4(),
            name: "driver".into(),
            rating,
            company: company.map(str::to_string),
            gender,
            total_rides_as_driver: 0,
        }
    }

    fn ride(driver: &User, at: DateTime<Utc>, seats: u32, cell: &str) -> Ride {
        let origin = Coordinate::new(12.9716, 77.5946);
        Ride {
            id: Uuid::new_v4(),
            driver_id: driver.id,
            origin,
            destination: origin,
            origin_address: None,
            destination_address: None,
            polyline: String::new(),
            geohashes: [GeohashCell::parse(cell).unwrap()].into_iter().collect(),
            route_distance_km: 0.0,
            departure_time: at,
            total_seats: seats,
            price_per_seat: 0.0,
            status: RideStatus::Scheduled,
            preferences: RidePreferences::default(),
            created_at: at,
        }
    }

    fn nine_am() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn list_orders_by_rating_then_departure() {
        let store = InMemoryRideStore::new();
        let top = user(4.9, None, None);
        let low = user(3.0, None, None);
        store.add_user(top.clone()).unwrap();
        store.add_user(low.clone()).unwrap();

        let late_top = ride(&top, nine_am() + TimeDelta::minutes(20), 3, "tdr1v9");
        let early_top = ride(&top, nine_am(), 3, "tdr1v9");
        let early_low = ride(&low, nine_am() - TimeDelta::minutes(20), 3, "tdr1v9");
        for r in [&late_top, &early_top, &early_low] {
            store.add_ride(r.clone()).unwrap();
        }

        let rides = store.list_scheduled_rides(&RideFilter::default()).await.unwrap();
        let ids: Vec<Uuid> = rides.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![early_top.id, late_top.id, early_low.id]);

        let limited = store
            .list_scheduled_rides(&RideFilter {
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn list_applies_every_filter() {
        let store = InMemoryRideStore::new();
        let acme = user(4.5, Some("Acme"), Some(Gender::Female));
        let other = user(4.5, Some("Globex"), Some(Gender::Male));
        store.add_user(acme.clone()).unwrap();
        store.add_user(other.clone()).unwrap();

        let near = ride(&acme, nine_am(), 4, "tdr1v9");
        let far = ride(&other, nine_am(), 4, "u4pruy");
        let mut cancelled = ride(&acme, nine_am(), 4, "tdr1v9");
        cancelled.status = RideStatus::Cancelled;
        let small = ride(&acme, nine_am(), 1, "tdr1v9");
        for r in [&near, &far, &cancelled, &small] {
            store.add_ride(r.clone()).unwrap();
        }

        let cells = cells_around(Coordinate::new(12.9716, 77.5946), 1, Precision::SIX).unwrap();
        let filter = RideFilter {
            departs_after: Some(nine_am() - TimeDelta::minutes(30)),
            departs_before: Some(nine_am() + TimeDelta::minutes(30)),
            min_seats: 2,
            geohash_in: Some(cells),
            company_eq: Some("Acme".into()),
            gender_eq: Some(Gender::Female),
            limit: None,
        };
        let rides = store.list_scheduled_rides(&filter).await.unwrap();
        assert_eq!(rides.len(), 1);
        assert_eq!(rides[0].id, near.id);

        let at_start = ride(&acme, nine_am() - TimeDelta::minutes(30), 4, "tdr1v9");
        let at_end = ride(&acme, nine_am() + TimeDelta::minutes(30), 4, "tdr1v9");
        let past_end = ride(&acme, nine_am() + TimeDelta::minutes(31), 4, "tdr1v9");
        for r in [&at_start, &at_end, &past_end] {
            store.add_ride(r.clone()).unwrap();
        }
        let mut ids: Vec<Uuid> = store
            .list_scheduled_rides(&filter)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        ids.sort();
        let mut expected = vec![near.id, at_start.id, at_end.id];
        expected.sort();
        assert_eq!(ids, expected);

        let outside_window = RideFilter {
            departs_after: Some(nine_am() + TimeDelta::minutes(1)),
            ..filter
        };
        assert!(store.list_scheduled_rides(&outside_window).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn counts_only_pending_and_accepted_seats() {
        let store = InMemoryRideStore::new();
        let driver = user(4.0, None, None);
        let r = ride(&driver, nine_am(), 4, "tdr1v9");
        store.add_ride(r.clone()).unwrap();

        for (status, seats) in [
            (BookingStatus::Pending, 1),
            (BookingStatus::Accepted, 2),
            (BookingStatus::Rejected, 3),
            (BookingStatus::Cancelled, 3),
        ] {
            store
                .add_booking(Booking {
                    id: Uuid::new_v4(),
                    ride_id: r.id,
                    passenger_id: Uuid::new_v4(),
                    seats_booked: seats,
                    pickup: r.origin,
                    status,
                    created_at: nine_am(),
                })
                .unwrap();
        }

        assert_eq!(store.count_active_booked_seats(r.id).await.unwrap(), 3);
        let batch = store.active_booked_seats_for(&[r.id]).await.unwrap();
        assert_eq!(batch.get(&r.id), Some(&3));
    }

    #[tokio::test]
    async fn recent_completed_pickups_newest_first() {
        let store = InMemoryRideStore::new();
        let passenger = Uuid::new_v4();
        for minutes in 0..7 {
            store
                .add_booking(Booking {
                    id: Uuid::new_v4(),
                    ride_id: Uuid::new_v4(),
                    passenger_id: passenger,
                    seats_booked: 1,
                    pickup: Coordinate::new(12.0 + minutes as f64, 77.0),
                    status: BookingStatus::Completed,
                    created_at: nine_am() + TimeDelta::minutes(minutes),
                })
                .unwrap();
        }

        let pickups = store.recent_completed_pickups(passenger, 5).await.unwrap();
        assert_eq!(pickups.len(), 5);
        assert_eq!(pickups[0].lat, 18.0);
        assert_eq!(pickups[4].lat, 14.0);
    }
}
