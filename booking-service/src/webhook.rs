use serde::Serialize;
use shared::*;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use crate::clock::Clock;
use crate::error::ServiceError;
use crate::store::{release_rooms, InventoryStore};

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub secret: String,
    pub tolerance_secs: i64,
}

impl WebhookSettings {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
            tolerance_secs: signature::DEFAULT_TOLERANCE_SECS,
        }
    }
}

/// What a delivered notification did to booking and payment state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEffect {
    Confirmed,
    Released,
    /// Duplicate or late delivery; nothing changed.
    AlreadySettled,
    Ignored,
}

enum Settlement {
    Applied(WebhookEffect),
    BookingMissing,
    PaymentMissing,
    PaymentMismatch { owner: i64 },
}

pub struct WebhookReconciler<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    settings: WebhookSettings,
}

impl<S: InventoryStore> WebhookReconciler<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, settings: WebhookSettings) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    /// Verifies and applies one gateway notification. Safe under duplicate
    /// and out-of-order delivery.
    pub async fn handle(
        &self,
        signature_header: Option<&str>,
        payload: &[u8],
    ) -> Result<WebhookEffect, ServiceError> {
        let header = signature_header.ok_or(ServiceError::InvalidSignature)?;
        verify_signature(
            &self.settings.secret,
            header,
            payload,
            self.clock.now().timestamp(),
            self.settings.tolerance_secs,
        )
        .map_err(|e| {
            warn!("Rejected webhook: {}", e);
            ServiceError::InvalidSignature
        })?;

        let event: WebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::InvalidRequest(format!("unparsable event: {}", e)))?;
        info!("Webhook {} received: {}", event.id, event.event_type);

        let outcome = event.outcome();
        if outcome == PaymentOutcome::Unhandled {
            debug!("No handling defined for {}", event.event_type);
            return Ok(WebhookEffect::Ignored);
        }

        let (booking_id, payment_id) = references(&event)?;
        let event_type = event.event_type.clone();

        let settlement = self
            .store
            .transaction(move |uow| {
                Box::pin(async move {
                    let Some(booking) = uow.lock_booking(booking_id).await? else {
                        return Ok(Settlement::BookingMissing);
                    };
                    if booking.status == BookingStatus::Confirmed || booking.status.is_terminal() {
                        if outcome == PaymentOutcome::Succeeded && booking.status == BookingStatus::Expired {
                            warn!(
                                "Payment captured for expired booking {} ({})",
                                booking.id, event_type
                            );
                        }
                        return Ok(Settlement::Applied(WebhookEffect::AlreadySettled));
                    }

                    let Some(payment) = uow.lock_payment(payment_id).await? else {
                        return Ok(Settlement::PaymentMissing);
                    };
                    if payment.booking_id != booking.id {
                        return Ok(Settlement::PaymentMismatch {
                            owner: payment.booking_id,
                        });
                    }
                    if payment.status.is_terminal() {
                        return Ok(Settlement::Applied(WebhookEffect::AlreadySettled));
                    }

                    let effect = match outcome {
                        PaymentOutcome::Succeeded => {
                            let next = booking.status.transition_to(BookingStatus::Confirmed)?;
                            uow.set_booking_status(booking.id, next).await?;
                            let next = payment.status.transition_to(PaymentStatus::Success)?;
                            uow.set_payment_status(payment.id, next).await?;
                            WebhookEffect::Confirmed
                        }
                        PaymentOutcome::Failed => {
                            release_rooms(uow, booking.hotel_id, booking.num_rooms).await?;
                            let next = booking.status.transition_to(BookingStatus::Failed)?;
                            uow.set_booking_status(booking.id, next).await?;
                            let next = payment.status.transition_to(PaymentStatus::Failed)?;
                            uow.set_payment_status(payment.id, next).await?;
                            WebhookEffect::Released
                        }
                        PaymentOutcome::Unhandled => WebhookEffect::Ignored,
                    };
                    Ok(Settlement::Applied(effect))
                })
            })
            .await?;

        match settlement {
            Settlement::Applied(effect) => {
                info!("Webhook for booking {} applied: {:?}", booking_id, effect);
                Ok(effect)
            }
            Settlement::BookingMissing => Err(ServiceError::BookingNotFound(booking_id)),
            Settlement::PaymentMissing => Err(ServiceError::PaymentNotFound(payment_id.to_string())),
            Settlement::PaymentMismatch { owner } => Err(ServiceError::MetadataMissing(format!(
                "payment {} belongs to booking {}, not {}",
                payment_id, owner, booking_id
            ))),
        }
    }
}

fn references(event: &WebhookEvent) -> Result<(i64, Uuid), ServiceError> {
    let metadata = &event.data.object.metadata;
    let booking_id = metadata
        .get(BOOKING_ID_FIELD)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or_else(|| ServiceError::MetadataMissing(BOOKING_ID_FIELD.to_string()))?;
    let payment_id = metadata
        .get(PAYMENT_ID_FIELD)
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or_else(|| ServiceError::MetadataMissing(PAYMENT_ID_FIELD.to_string()))?;
    Ok((booking_id, payment_id))
}
