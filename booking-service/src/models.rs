use bigdecimal::BigDecimal;
use chrono::{DateTime, Days, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::*;
use uuid::Uuid;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::hotels)]
pub struct Hotel {
    pub id: i64,
    pub name: String,
    pub total_rooms: i32,
    pub available_rooms: i32,
    pub cost_per_night: BigDecimal,
    pub created_at: DateTime<Utc>,
}

impl Hotel {
    pub fn total_cost(&self, num_rooms: i32, num_days: i32) -> BigDecimal {
        &self.cost_per_night * BigDecimal::from(num_rooms) * BigDecimal::from(num_days)
    }

    /// Rooms can go back only while the counter stays within `total_rooms`.
    pub fn can_release(&self, num_rooms: i32) -> bool {
        self.available_rooms + num_rooms <= self.total_rooms
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::hotels)]
pub struct NewHotel {
    pub name: String,
    pub total_rooms: i32,
    pub available_rooms: i32,
    pub cost_per_night: BigDecimal,
}

impl NewHotel {
    pub fn new(name: &str, total_rooms: i32, cost_per_night: BigDecimal) -> Self {
        Self {
            name: name.to_string(),
            total_rooms,
            available_rooms: total_rooms,
            cost_per_night,
        }
    }
}

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = crate::schema::bookings)]
pub struct DbBooking {
    pub id: i64,
    pub hotel_id: i64,
    pub user_id: i64,
    pub num_rooms: i32,
    pub num_days: i32,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::bookings)]
pub struct NewDbBooking {
    pub hotel_id: i64,
    pub user_id: i64,
    pub num_rooms: i32,
    pub num_days: i32,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub hotel_id: i64,
    pub user_id: i64,
    pub num_rooms: i32,
    pub num_days: i32,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn details(&self, total_cost: BigDecimal) -> BookingDetails {
        BookingDetails {
            booking_id: self.id,
            hotel_id: self.hotel_id,
            num_rooms: self.num_rooms,
            num_days: self.num_days,
            check_in_date: self.check_in_date,
            check_out_date: self.check_out_date,
            total_cost,
            status: self.status,
        }
    }
}

/// A booking about to be admitted; always stored as `pending`.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub hotel_id: i64,
    pub user_id: i64,
    pub num_rooms: i32,
    pub num_days: i32,
    pub check_in_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Check-in plus `num_days`, or `None` when the date falls off the calendar.
pub fn check_out_for(check_in_date: NaiveDate, num_days: i32) -> Option<NaiveDate> {
    let days = u64::try_from(num_days).ok()?;
    check_in_date.checked_add_days(Days::new(days))
}

impl NewBooking {
    /// Admission validates the stay length first, so the fallback is never hit
    /// for stored bookings.
    pub fn check_out_date(&self) -> NaiveDate {
        check_out_for(self.check_in_date, self.num_days).unwrap_or(NaiveDate::MAX)
    }

    pub fn into_booking(self, id: i64) -> Booking {
        let check_out_date = self.check_out_date();
        Booking {
            id,
            hotel_id: self.hotel_id,
            user_id: self.user_id,
            num_rooms: self.num_rooms,
            num_days: self.num_days,
            check_in_date: self.check_in_date,
            check_out_date,
            status: BookingStatus::Pending,
            created_at: self.created_at,
        }
    }
}

impl From<NewBooking> for NewDbBooking {
    fn from(booking: NewBooking) -> Self {
        Self {
            hotel_id: booking.hotel_id,
            user_id: booking.user_id,
            num_rooms: booking.num_rooms,
            num_days: booking.num_days,
            check_in_date: booking.check_in_date,
            check_out_date: booking.check_out_date(),
            status: BookingStatus::Pending.as_str().to_string(),
            created_at: booking.created_at,
        }
    }
}

impl TryFrom<DbBooking> for Booking {
    type Error = StoreError;

    fn try_from(row: DbBooking) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<BookingStatus>()
            .map_err(|e| StoreError::Corrupt(format!("booking {}: {}", row.id, e)))?;

        Ok(Self {
            id: row.id,
            hotel_id: row.hotel_id,
            user_id: row.user_id,
            num_rooms: row.num_rooms,
            num_days: row.num_days,
            check_in_date: row.check_in_date,
            check_out_date: row.check_out_date,
            status,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = crate::schema::payments)]
pub struct DbPayment {
    pub id: Uuid,
    pub booking_id: i64,
    pub checkout_session_id: String,
    pub checkout_url: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::payments)]
pub struct NewDbPayment {
    pub id: Uuid,
    pub booking_id: i64,
    pub checkout_session_id: String,
    pub checkout_url: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: i64,
    pub checkout_session_id: String,
    pub checkout_url: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn status_response(&self) -> PaymentStatusResponse {
        PaymentStatusResponse {
            payment_id: self.id,
            booking_id: self.booking_id,
            checkout_session_id: self.checkout_session_id.clone(),
            amount: self.amount.clone(),
            currency: self.currency.clone(),
            status: self.status,
        }
    }
}

/// A payment row opened right after admission; always stored as `pending`.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub id: Uuid,
    pub booking_id: i64,
    pub checkout_session_id: String,
    pub checkout_url: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl NewPayment {
    pub fn into_payment(self) -> Payment {
        Payment {
            id: self.id,
            booking_id: self.booking_id,
            checkout_session_id: self.checkout_session_id,
            checkout_url: self.checkout_url,
            amount: self.amount,
            currency: self.currency,
            status: PaymentStatus::Pending,
            created_at: self.created_at,
        }
    }
}

impl From<NewPayment> for NewDbPayment {
    fn from(payment: NewPayment) -> Self {
        Self {
            id: payment.id,
            booking_id: payment.booking_id,
            checkout_session_id: payment.checkout_session_id,
            checkout_url: payment.checkout_url,
            amount: payment.amount,
            currency: payment.currency,
            status: PaymentStatus::Pending.as_str().to_string(),
            created_at: payment.created_at,
        }
    }
}

impl TryFrom<DbPayment> for Payment {
    type Error = StoreError;

    fn try_from(row: DbPayment) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<PaymentStatus>()
            .map_err(|e| StoreError::Corrupt(format!("payment {}: {}", row.id, e)))?;

        Ok(Self {
            id: row.id,
            booking_id: row.booking_id,
            checkout_session_id: row.checkout_session_id,
            checkout_url: row.checkout_url,
            amount: row.amount,
            currency: row.currency,
            status,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Insertable)]
#[diesel(table_name = crate::schema::idempotency_keys)]
pub struct IdempotencyRecord {
    pub id: Uuid,
    pub idempotency_key: String,
    pub user_id: i64,
    pub endpoint: String,
    pub request_payload: serde_json::Value,
    pub response_payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
