//! Inventory Store: the only owner of hotel, booking, payment and idempotency
//! records.
//!
//! Every read and write happens inside [`InventoryStore::transaction`]. The
//! closure receives a [`UnitOfWork`]; returning `Ok` commits it, returning
//! `Err` (or panicking) rolls it back. Row locks taken through the `lock_*`
//! methods are held until the unit of work ends.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::BoxFuture;
use shared::{BookingStatus, PaymentStatus, TransitionError};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;
use crate::models::*;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{DbPool, PgStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[source] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("timed out waiting for a row lock")]
    LockTimeout,
    #[error("duplicate record: {0}")]
    Duplicate(String),
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};

        match err {
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                StoreError::Duplicate(info.message().to_string())
            }
            Error::DatabaseError(
                DatabaseErrorKind::CheckViolation | DatabaseErrorKind::ForeignKeyViolation,
                info,
            ) => StoreError::Constraint(info.message().to_string()),
            // SQLSTATE 55P03 has no dedicated kind
            Error::DatabaseError(_, info) if info.message().contains("lock timeout") => {
                StoreError::LockTimeout
            }
            other => StoreError::Database(other),
        }
    }
}

#[async_trait]
pub trait UnitOfWork: Send {
    async fn insert_hotel(&mut self, hotel: NewHotel) -> Result<Hotel, StoreError>;
    async fn find_hotel(&mut self, id: i64) -> Result<Option<Hotel>, StoreError>;
    /// Exclusive row lock on the hotel until the unit of work ends.
    async fn lock_hotel(&mut self, id: i64) -> Result<Option<Hotel>, StoreError>;
    /// Adds `delta` to `available_rooms`. Fails with `Constraint` if the
    /// counter would leave `0..=total_rooms`.
    async fn adjust_available_rooms(&mut self, id: i64, delta: i32) -> Result<Hotel, StoreError>;

    async fn insert_booking(&mut self, booking: NewBooking) -> Result<Booking, StoreError>;
    async fn find_booking(&mut self, id: i64) -> Result<Option<Booking>, StoreError>;
    async fn lock_booking(&mut self, id: i64) -> Result<Option<Booking>, StoreError>;
    async fn set_booking_status(&mut self, id: i64, status: BookingStatus) -> Result<(), StoreError>;
    /// Pending bookings created strictly before `created_before`, oldest first.
    async fn stale_pending_bookings(
        &mut self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Booking>, StoreError>;
    /// Confirmed bookings whose check-out date is on or before `as_of`.
    async fn finished_stays(&mut self, as_of: NaiveDate, limit: i64) -> Result<Vec<Booking>, StoreError>;

    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment, StoreError>;
    async fn find_payment(&mut self, id: Uuid) -> Result<Option<Payment>, StoreError>;
    async fn lock_payment(&mut self, id: Uuid) -> Result<Option<Payment>, StoreError>;
    async fn find_payment_for_booking(&mut self, booking_id: i64) -> Result<Option<Payment>, StoreError>;
    async fn set_payment_status(&mut self, id: Uuid, status: PaymentStatus) -> Result<(), StoreError>;
    async fn stale_pending_payments(
        &mut self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, StoreError>;

    async fn find_idempotency_key(&mut self, key: &str) -> Result<Option<IdempotencyRecord>, StoreError>;
    /// Fails with `Duplicate` when the key is already recorded.
    async fn insert_idempotency_key(&mut self, record: IdempotencyRecord) -> Result<(), StoreError>;
}

#[async_trait]
pub trait InventoryStore: Send + Sync + 'static {
    async fn transaction<R, F>(&self, work: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn UnitOfWork) -> BoxFuture<'t, Result<R, StoreError>>
            + Send
            + 'static;
}

/// Returns `rooms` to the hotel under its row lock. Returns `false` without
/// writing if that would push `available_rooms` past `total_rooms`, which
/// means the rooms were already given back.
pub async fn release_rooms(
    uow: &mut dyn UnitOfWork,
    hotel_id: i64,
    rooms: i32,
) -> Result<bool, StoreError> {
    let Some(hotel) = uow.lock_hotel(hotel_id).await? else {
        warn!("Hotel {} vanished, cannot release {} rooms", hotel_id, rooms);
        return Ok(false);
    };

    if !hotel.can_release(rooms) {
        warn!(
            "Skipping release of {} rooms for hotel {}: available {} of {}",
            rooms, hotel_id, hotel.available_rooms, hotel.total_rooms
        );
        return Ok(false);
    }

    uow.adjust_available_rooms(hotel_id, rooms).await?;
    Ok(true)
}
