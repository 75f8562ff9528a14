use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use num_traits::ToPrimitive;
use shared::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;
use crate::clock::Clock;
use crate::error::ServiceError;
use crate::gateway::{CheckoutGateway, CheckoutRequest, CheckoutSession, GatewayError};
use crate::idempotency::{IdempotencyResolver, Resolution};
use crate::models::*;
use crate::store::{release_rooms, InventoryStore};

#[derive(Debug, Clone)]
pub struct AdmissionSettings {
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            currency: "INR".to_string(),
            success_url: "http://localhost:8080/success".to_string(),
            cancel_url: "http://localhost:8080/cancel".to_string(),
        }
    }
}

enum Admission {
    HotelMissing,
    Exhausted { available: i32 },
    Reserved { booking: Booking, total_cost: BigDecimal },
}

pub struct BookingService<S> {
    store: Arc<S>,
    gateway: Arc<dyn CheckoutGateway>,
    clock: Arc<dyn Clock>,
    idempotency: IdempotencyResolver<S>,
    settings: AdmissionSettings,
}

impl<S: InventoryStore> BookingService<S> {
    pub fn new(
        store: Arc<S>,
        gateway: Arc<dyn CheckoutGateway>,
        clock: Arc<dyn Clock>,
        settings: AdmissionSettings,
    ) -> Self {
        let idempotency = IdempotencyResolver::new(store.clone(), clock.clone());
        Self {
            store,
            gateway,
            clock,
            idempotency,
            settings,
        }
    }

    /// Admits a booking request: replays or rejects reused keys, reserves
    /// rooms under the hotel row lock, then opens a checkout session.
    pub async fn book_hotel(
        &self,
        user_id: i64,
        idempotency_key: Option<&str>,
        request: BookHotelRequest,
    ) -> Result<BookHotelResponse, ServiceError> {
        if let Resolution::Replay(response) = self
            .idempotency
            .resolve(idempotency_key, user_id, &request)
            .await?
        {
            return Ok(response);
        }
        let key = idempotency_key.unwrap_or_default();

        let check_in_date = self.validate(&request)?;
        let new_booking = NewBooking {
            hotel_id: request.hotel_id,
            user_id,
            num_rooms: request.num_rooms,
            num_days: request.num_days,
            check_in_date,
            created_at: self.clock.now(),
        };

        let admission = self
            .store
            .transaction(move |uow| {
                Box::pin(async move {
                    let Some(hotel) = uow.lock_hotel(new_booking.hotel_id).await? else {
                        return Ok(Admission::HotelMissing);
                    };
                    if hotel.available_rooms < new_booking.num_rooms {
                        return Ok(Admission::Exhausted {
                            available: hotel.available_rooms,
                        });
                    }

                    uow.adjust_available_rooms(hotel.id, -new_booking.num_rooms).await?;
                    let total_cost = hotel.total_cost(new_booking.num_rooms, new_booking.num_days);
                    let booking = uow.insert_booking(new_booking).await?;
                    Ok(Admission::Reserved { booking, total_cost })
                })
            })
            .await?;

        let response = match admission {
            Admission::HotelMissing => return Err(ServiceError::HotelNotFound(request.hotel_id)),
            Admission::Exhausted { available } => {
                info!(
                    "Hotel {} cannot fit {} rooms, {} available",
                    request.hotel_id, request.num_rooms, available
                );
                BookHotelResponse::capacity_exhausted(available)
            }
            Admission::Reserved { booking, total_cost } => {
                info!(
                    "Reserved {} rooms at hotel {} as booking {}",
                    booking.num_rooms, booking.hotel_id, booking.id
                );
                self.open_payment(booking, total_cost).await?
            }
        };

        self.idempotency.record(key, user_id, &request, response).await
    }

    fn validate(&self, request: &BookHotelRequest) -> Result<NaiveDate, ServiceError> {
        if request.num_rooms <= 0 {
            return Err(ServiceError::InvalidRequest("num_rooms must be positive".to_string()));
        }
        if request.num_days <= 0 {
            return Err(ServiceError::InvalidRequest("num_days must be positive".to_string()));
        }
        if request.num_days > MAX_NUM_DAYS {
            return Err(ServiceError::InvalidRequest(format!(
                "num_days must be at most {}",
                MAX_NUM_DAYS
            )));
        }

        let check_in_date = NaiveDate::parse_from_str(request.check_in_date.trim(), DATE_FORMAT)
            .map_err(|_| {
                ServiceError::InvalidRequest(format!(
                    "check_in_date '{}' is not a YYYY-MM-DD date",
                    request.check_in_date
                ))
            })?;
        if check_in_date < self.clock.today() {
            return Err(ServiceError::InvalidRequest(
                "check_in_date is in the past".to_string(),
            ));
        }
        if check_out_for(check_in_date, request.num_days).is_none() {
            return Err(ServiceError::InvalidRequest(
                "check-out date is out of range".to_string(),
            ));
        }
        Ok(check_in_date)
    }

    async fn open_payment(
        &self,
        booking: Booking,
        total_cost: BigDecimal,
    ) -> Result<BookHotelResponse, ServiceError> {
        let payment_id = Uuid::new_v4();
        let session = match self.create_session(&booking, &total_cost, payment_id).await {
            Ok(session) => session,
            Err(e) => {
                error!("Checkout session for booking {} failed: {}", booking.id, e);
                self.abandon_reservation(&booking).await;
                return Err(e.into());
            }
        };

        let new_payment = NewPayment {
            id: payment_id,
            booking_id: booking.id,
            checkout_session_id: session.session_id.clone(),
            checkout_url: Some(session.url.clone()),
            amount: total_cost.clone(),
            currency: self.settings.currency.clone(),
            created_at: self.clock.now(),
        };
        let persisted = self
            .store
            .transaction(move |uow| Box::pin(async move { uow.insert_payment(new_payment).await }))
            .await;

        let details = booking.details(total_cost);
        match persisted {
            Ok(payment) => {
                info!("Payment {} pending for booking {}", payment.id, booking.id);
                Ok(BookHotelResponse::reserved(details, payment.id, session.url))
            }
            Err(e) => {
                warn!(
                    "Booking {} reserved but payment row was not saved: {}",
                    booking.id, e
                );
                Ok(BookHotelResponse::payment_degraded(details))
            }
        }
    }

    async fn create_session(
        &self,
        booking: &Booking,
        total_cost: &BigDecimal,
        payment_id: Uuid,
    ) -> Result<CheckoutSession, GatewayError> {
        let amount_minor = (total_cost * BigDecimal::from(100))
            .round(0)
            .to_i64()
            .ok_or_else(|| GatewayError::InvalidAmount(total_cost.to_string()))?;

        let mut metadata = HashMap::new();
        metadata.insert(BOOKING_ID_FIELD.to_string(), booking.id.to_string());
        metadata.insert(PAYMENT_ID_FIELD.to_string(), payment_id.to_string());

        self.gateway
            .create_session(CheckoutRequest {
                amount_minor,
                currency: self.settings.currency.clone(),
                reference: format!("booking-{}", booking.id),
                metadata,
                success_url: self.settings.success_url.clone(),
                cancel_url: self.settings.cancel_url.clone(),
            })
            .await
    }

    /// Gives the rooms back and fails the booking when no checkout could be
    /// opened for it, so a retry under the same key starts from a clean slate.
    /// If this unit of work fails too, the stale-booking sweep reclaims it.
    async fn abandon_reservation(&self, booking: &Booking) {
        let (booking_id, hotel_id, rooms) = (booking.id, booking.hotel_id, booking.num_rooms);
        let abandoned = self
            .store
            .transaction(move |uow| {
                Box::pin(async move {
                    let Some(booking) = uow.lock_booking(booking_id).await? else {
                        return Ok(false);
                    };
                    if booking.status != BookingStatus::Pending {
                        return Ok(false);
                    }
                    let next = booking.status.transition_to(BookingStatus::Failed)?;
                    release_rooms(uow, hotel_id, rooms).await?;
                    uow.set_booking_status(booking_id, next).await?;
                    Ok(true)
                })
            })
            .await;

        match abandoned {
            Ok(true) => info!("Released {} rooms of unpaid booking {}", rooms, booking_id),
            Ok(false) => {}
            Err(e) => warn!(
                "Booking {} stays pending after checkout failure: {}",
                booking_id, e
            ),
        }
    }

    pub async fn booking_status(&self, booking_id: i64) -> Result<BookingStatusResponse, ServiceError> {
        let found = self
            .store
            .transaction(move |uow| {
                Box::pin(async move {
                    let Some(booking) = uow.find_booking(booking_id).await? else {
                        return Ok(None);
                    };
                    let payment = uow.find_payment_for_booking(booking_id).await?;
                    let hotel = uow.find_hotel(booking.hotel_id).await?;
                    Ok(Some((booking, payment, hotel)))
                })
            })
            .await?;

        let (booking, payment, hotel) = found.ok_or(ServiceError::BookingNotFound(booking_id))?;
        let total_cost = match &payment {
            Some(payment) => Some(payment.amount.clone()),
            None => hotel.map(|h| h.total_cost(booking.num_rooms, booking.num_days)),
        };

        Ok(BookingStatusResponse {
            booking_id: booking.id,
            hotel_id: booking.hotel_id,
            num_rooms: booking.num_rooms,
            num_days: booking.num_days,
            check_in_date: booking.check_in_date,
            check_out_date: booking.check_out_date,
            booking_time: booking.created_at,
            status: booking.status,
            payment_status: payment.map(|p| p.status),
            total_cost,
        })
    }

    pub async fn payment_status(&self, payment_id: Uuid) -> Result<PaymentStatusResponse, ServiceError> {
        let payment = self
            .store
            .transaction(move |uow| Box::pin(async move { uow.find_payment(payment_id).await }))
            .await?;

        payment
            .map(|p| p.status_response())
            .ok_or_else(|| ServiceError::PaymentNotFound(payment_id.to_string()))
    }

    /// The hosted checkout page for a booking that is still awaiting payment.
    pub async fn checkout_url(&self, booking_id: i64) -> Result<String, ServiceError> {
        let found = self
            .store
            .transaction(move |uow| {
                Box::pin(async move {
                    let booking = uow.find_booking(booking_id).await?;
                    let payment = uow.find_payment_for_booking(booking_id).await?;
                    Ok((booking, payment))
                })
            })
            .await?;

        match found {
            (None, _) => Err(ServiceError::BookingNotFound(booking_id)),
            (Some(booking), _) if booking.status != BookingStatus::Pending => Err(
                ServiceError::InvalidRequest(format!("booking {} is {}", booking_id, booking.status)),
            ),
            (Some(_), Some(Payment { status: PaymentStatus::Pending, checkout_url: Some(url), .. })) => {
                Ok(url)
            }
            (Some(_), _) => Err(ServiceError::PaymentNotFound(format!("booking {}", booking_id))),
        }
    }
}
