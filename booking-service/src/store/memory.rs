//! In-process store for tests and local runs without Postgres.
//!
//! One async mutex guards the whole table set, so a unit of work here locks
//! more than a row lock would. Work runs against a copy of the tables which
//! replaces the shared state only when the closure returns `Ok`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::BoxFuture;
use shared::{BookingStatus, PaymentStatus};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;
use crate::models::*;
use super::{InventoryStore, StoreError, UnitOfWork};

#[derive(Debug, Clone, Default)]
struct Tables {
    hotels: BTreeMap<i64, Hotel>,
    bookings: BTreeMap<i64, Booking>,
    payments: BTreeMap<Uuid, Payment>,
    idempotency_keys: BTreeMap<String, IdempotencyRecord>,
    last_hotel_id: i64,
    last_booking_id: i64,
}

#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    lock_timeout: Duration,
}

impl MemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            lock_timeout,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn transaction<R, F>(&self, work: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn UnitOfWork) -> BoxFuture<'t, Result<R, StoreError>>
            + Send
            + 'static,
    {
        let mut guard = tokio::time::timeout(self.lock_timeout, self.tables.lock())
            .await
            .map_err(|_| StoreError::LockTimeout)?;

        let mut uow = MemoryUnitOfWork {
            tables: guard.clone(),
        };
        let result = work(&mut uow).await;
        if result.is_ok() {
            *guard = uow.tables;
        }
        result
    }
}

struct MemoryUnitOfWork {
    tables: Tables,
}

impl MemoryUnitOfWork {
    fn hotel_mut(&mut self, id: i64) -> Result<&mut Hotel, StoreError> {
        self.tables
            .hotels
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("hotel {}", id)))
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn insert_hotel(&mut self, hotel: NewHotel) -> Result<Hotel, StoreError> {
        if hotel.available_rooms < 0 || hotel.available_rooms > hotel.total_rooms {
            return Err(StoreError::Constraint("hotels_available_rooms_range".to_string()));
        }

        self.tables.last_hotel_id += 1;
        let hotel = Hotel {
            id: self.tables.last_hotel_id,
            name: hotel.name,
            total_rooms: hotel.total_rooms,
            available_rooms: hotel.available_rooms,
            cost_per_night: hotel.cost_per_night,
            created_at: Utc::now(),
        };
        self.tables.hotels.insert(hotel.id, hotel.clone());
        Ok(hotel)
    }

    async fn find_hotel(&mut self, id: i64) -> Result<Option<Hotel>, StoreError> {
        Ok(self.tables.hotels.get(&id).cloned())
    }

    async fn lock_hotel(&mut self, id: i64) -> Result<Option<Hotel>, StoreError> {
        self.find_hotel(id).await
    }

    async fn adjust_available_rooms(&mut self, id: i64, delta: i32) -> Result<Hotel, StoreError> {
        let hotel = self.hotel_mut(id)?;
        let available = hotel.available_rooms + delta;
        if available < 0 || available > hotel.total_rooms {
            return Err(StoreError::Constraint("hotels_available_rooms_range".to_string()));
        }
        hotel.available_rooms = available;
        Ok(hotel.clone())
    }

    async fn insert_booking(&mut self, booking: NewBooking) -> Result<Booking, StoreError> {
        if !self.tables.hotels.contains_key(&booking.hotel_id) {
            return Err(StoreError::Constraint("bookings_hotel_id_fkey".to_string()));
        }

        self.tables.last_booking_id += 1;
        let booking = booking.into_booking(self.tables.last_booking_id);
        self.tables.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn find_booking(&mut self, id: i64) -> Result<Option<Booking>, StoreError> {
        Ok(self.tables.bookings.get(&id).cloned())
    }

    async fn lock_booking(&mut self, id: i64) -> Result<Option<Booking>, StoreError> {
        self.find_booking(id).await
    }

    async fn set_booking_status(&mut self, id: i64, status: BookingStatus) -> Result<(), StoreError> {
        let booking = self
            .tables
            .bookings
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("booking {}", id)))?;
        booking.status = status;
        Ok(())
    }

    async fn stale_pending_bookings(
        &mut self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Booking>, StoreError> {
        let mut stale: Vec<Booking> = self
            .tables
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Pending && b.created_at < created_before)
            .cloned()
            .collect();
        stale.sort_by_key(|b| b.created_at);
        stale.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stale)
    }

    async fn finished_stays(&mut self, as_of: NaiveDate, limit: i64) -> Result<Vec<Booking>, StoreError> {
        let mut finished: Vec<Booking> = self
            .tables
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Confirmed && b.check_out_date <= as_of)
            .cloned()
            .collect();
        finished.sort_by_key(|b| b.check_out_date);
        finished.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(finished)
    }

    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment, StoreError> {
        if !self.tables.bookings.contains_key(&payment.booking_id) {
            return Err(StoreError::Constraint("payments_booking_id_fkey".to_string()));
        }
        if self
            .tables
            .payments
            .values()
            .any(|p| p.booking_id == payment.booking_id)
        {
            return Err(StoreError::Duplicate(format!(
                "payment for booking {}",
                payment.booking_id
            )));
        }
        if self.tables.payments.contains_key(&payment.id) {
            return Err(StoreError::Duplicate(format!("payment {}", payment.id)));
        }

        let payment = payment.into_payment();
        self.tables.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn find_payment(&mut self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self.tables.payments.get(&id).cloned())
    }

    async fn lock_payment(&mut self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        self.find_payment(id).await
    }

    async fn find_payment_for_booking(&mut self, booking_id: i64) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .tables
            .payments
            .values()
            .find(|p| p.booking_id == booking_id)
            .cloned())
    }

    async fn set_payment_status(&mut self, id: Uuid, status: PaymentStatus) -> Result<(), StoreError> {
        let payment = self
            .tables
            .payments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", id)))?;
        payment.status = status;
        Ok(())
    }

    async fn stale_pending_payments(
        &mut self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, StoreError> {
        let mut stale: Vec<Payment> = self
            .tables
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending && p.created_at < created_before)
            .cloned()
            .collect();
        stale.sort_by_key(|p| p.created_at);
        stale.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stale)
    }

    async fn find_idempotency_key(&mut self, key: &str) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self.tables.idempotency_keys.get(key).cloned())
    }

    async fn insert_idempotency_key(&mut self, record: IdempotencyRecord) -> Result<(), StoreError> {
        if self.tables.idempotency_keys.contains_key(&record.idempotency_key) {
            return Err(StoreError::Duplicate(format!(
                "idempotency key {}",
                record.idempotency_key
            )));
        }
        self.tables
            .idempotency_keys
            .insert(record.idempotency_key.clone(), record);
        Ok(())
    }
}
