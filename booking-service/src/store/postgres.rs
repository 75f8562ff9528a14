use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::pooled_connection::{bb8::Pool, AsyncDieselConnectionManager};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use futures::future::BoxFuture;
use shared::{BookingStatus, PaymentStatus};
use std::time::Duration;
use uuid::Uuid;
use crate::models::*;
use crate::schema::*;
use super::{InventoryStore, StoreError, UnitOfWork};

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
    lock_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: DbPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub async fn connect(
        database_url: &str,
        max_size: u32,
        lock_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(max_size)
            .build(config)
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        Ok(Self::new(pool, lock_timeout))
    }
}

#[async_trait]
impl InventoryStore for PgStore {
    async fn transaction<R, F>(&self, work: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn UnitOfWork) -> BoxFuture<'t, Result<R, StoreError>>
            + Send
            + 'static,
    {
        let mut conn = self.pool.get().await.map_err(|e| match e {
            bb8::RunError::TimedOut => {
                StoreError::Pool("timed out waiting for a connection".to_string())
            }
            bb8::RunError::User(e) => StoreError::Pool(e.to_string()),
        })?;
        let lock_timeout_ms = self.lock_timeout.as_millis();

        conn.transaction::<R, StoreError, _>(|conn| {
            async move {
                diesel::sql_query(format!("SET LOCAL lock_timeout = '{}ms'", lock_timeout_ms))
                    .execute(conn)
                    .await?;

                let mut uow = PgUnitOfWork { conn };
                work(&mut uow).await
            }
            .scope_boxed()
        })
        .await
    }
}

struct PgUnitOfWork<'c> {
    conn: &'c mut AsyncPgConnection,
}

impl PgUnitOfWork<'_> {
    fn conn(&mut self) -> &mut AsyncPgConnection {
        &mut *self.conn
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork<'_> {
    async fn insert_hotel(&mut self, hotel: NewHotel) -> Result<Hotel, StoreError> {
        let hotel = diesel::insert_into(hotels::table)
            .values(&hotel)
            .get_result::<Hotel>(self.conn())
            .await?;
        Ok(hotel)
    }

    async fn find_hotel(&mut self, id: i64) -> Result<Option<Hotel>, StoreError> {
        let hotel = hotels::table
            .find(id)
            .first::<Hotel>(self.conn())
            .await
            .optional()?;
        Ok(hotel)
    }

    async fn lock_hotel(&mut self, id: i64) -> Result<Option<Hotel>, StoreError> {
        let hotel = hotels::table
            .find(id)
            .for_update()
            .first::<Hotel>(self.conn())
            .await
            .optional()?;
        Ok(hotel)
    }

    async fn adjust_available_rooms(&mut self, id: i64, delta: i32) -> Result<Hotel, StoreError> {
        diesel::update(hotels::table.find(id))
            .set(hotels::available_rooms.eq(hotels::available_rooms + delta))
            .get_result::<Hotel>(self.conn())
            .await
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("hotel {}", id)))
    }

    async fn insert_booking(&mut self, booking: NewBooking) -> Result<Booking, StoreError> {
        let row = diesel::insert_into(bookings::table)
            .values(NewDbBooking::from(booking))
            .get_result::<DbBooking>(self.conn())
            .await?;
        Booking::try_from(row)
    }

    async fn find_booking(&mut self, id: i64) -> Result<Option<Booking>, StoreError> {
        bookings::table
            .find(id)
            .first::<DbBooking>(self.conn())
            .await
            .optional()?
            .map(Booking::try_from)
            .transpose()
    }

    async fn lock_booking(&mut self, id: i64) -> Result<Option<Booking>, StoreError> {
        bookings::table
            .find(id)
            .for_update()
            .first::<DbBooking>(self.conn())
            .await
            .optional()?
            .map(Booking::try_from)
            .transpose()
    }

    async fn set_booking_status(&mut self, id: i64, status: BookingStatus) -> Result<(), StoreError> {
        let updated = diesel::update(bookings::table.find(id))
            .set((
                bookings::status.eq(status.as_str()),
                bookings::updated_at.eq(Utc::now()),
            ))
            .execute(self.conn())
            .await?;

        if updated == 0 {
            return Err(StoreError::NotFound(format!("booking {}", id)));
        }
        Ok(())
    }

    async fn stale_pending_bookings(
        &mut self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Booking>, StoreError> {
        bookings::table
            .filter(bookings::status.eq(BookingStatus::Pending.as_str()))
            .filter(bookings::created_at.lt(created_before))
            .order(bookings::created_at.asc())
            .limit(limit)
            .load::<DbBooking>(self.conn())
            .await?
            .into_iter()
            .map(Booking::try_from)
            .collect()
    }

    async fn finished_stays(&mut self, as_of: NaiveDate, limit: i64) -> Result<Vec<Booking>, StoreError> {
        bookings::table
            .filter(bookings::status.eq(BookingStatus::Confirmed.as_str()))
            .filter(bookings::check_out_date.le(as_of))
            .order(bookings::check_out_date.asc())
            .limit(limit)
            .load::<DbBooking>(self.conn())
            .await?
            .into_iter()
            .map(Booking::try_from)
            .collect()
    }

    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment, StoreError> {
        let row = diesel::insert_into(payments::table)
            .values(NewDbPayment::from(payment))
            .get_result::<DbPayment>(self.conn())
            .await?;
        Payment::try_from(row)
    }

    async fn find_payment(&mut self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        payments::table
            .find(id)
            .first::<DbPayment>(self.conn())
            .await
            .optional()?
            .map(Payment::try_from)
            .transpose()
    }

    async fn lock_payment(&mut self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        payments::table
            .find(id)
            .for_update()
            .first::<DbPayment>(self.conn())
            .await
            .optional()?
            .map(Payment::try_from)
            .transpose()
    }

    async fn find_payment_for_booking(&mut self, booking_id: i64) -> Result<Option<Payment>, StoreError> {
        payments::table
            .filter(payments::booking_id.eq(booking_id))
            .first::<DbPayment>(self.conn())
            .await
            .optional()?
            .map(Payment::try_from)
            .transpose()
    }

    async fn set_payment_status(&mut self, id: Uuid, status: PaymentStatus) -> Result<(), StoreError> {
        let updated = diesel::update(payments::table.find(id))
            .set((
                payments::status.eq(status.as_str()),
                payments::updated_at.eq(Utc::now()),
            ))
            .execute(self.conn())
            .await?;

        if updated == 0 {
            return Err(StoreError::NotFound(format!("payment {}", id)));
        }
        Ok(())
    }

    async fn stale_pending_payments(
        &mut self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, StoreError> {
        payments::table
            .filter(payments::status.eq(PaymentStatus::Pending.as_str()))
            .filter(payments::created_at.lt(created_before))
            .order(payments::created_at.asc())
            .limit(limit)
            .load::<DbPayment>(self.conn())
            .await?
            .into_iter()
            .map(Payment::try_from)
            .collect()
    }

    async fn find_idempotency_key(&mut self, key: &str) -> Result<Option<IdempotencyRecord>, StoreError> {
        let record = idempotency_keys::table
            .filter(idempotency_keys::idempotency_key.eq(key))
            .first::<IdempotencyRecord>(self.conn())
            .await
            .optional()?;
        Ok(record)
    }

    async fn insert_idempotency_key(&mut self, record: IdempotencyRecord) -> Result<(), StoreError> {
        diesel::insert_into(idempotency_keys::table)
            .values(&record)
            .execute(self.conn())
            .await?;
        Ok(())
    }
}
