use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub mod signature;
pub mod status;

pub use signature::{sign_payload, verify_signature, SignatureError};
pub use status::{BookingStatus, PaymentStatus, TransitionError};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const SIGNATURE_HEADER: &str = "Webhook-Signature";
pub const USER_ID_HEADER: &str = "X-User-Id";
pub const BOOKING_ID_FIELD: &str = "booking_id";
pub const PAYMENT_ID_FIELD: &str = "payment_id";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Longest stay a single booking may cover.
pub const MAX_NUM_DAYS: i32 = 365;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookHotelRequest {
    pub hotel_id: i64,
    pub num_rooms: i32,
    pub num_days: i32,
    /// `YYYY-MM-DD`
    pub check_in_date: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionOutcome {
    Reserved,
    CapacityExhausted,
    PaymentDegraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingDetails {
    pub booking_id: i64,
    pub hotel_id: i64,
    pub num_rooms: i32,
    pub num_days: i32,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub total_cost: BigDecimal,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookHotelResponse {
    pub success: bool,
    pub outcome: AdmissionOutcome,
    pub message: String,
    pub booking: Option<BookingDetails>,
    pub payment_id: Option<Uuid>,
    pub checkout_url: Option<String>,
}

impl BookHotelResponse {
    pub fn reserved(booking: BookingDetails, payment_id: Uuid, checkout_url: String) -> Self {
        Self {
            success: true,
            outcome: AdmissionOutcome::Reserved,
            message: "Booking request created successfully".to_string(),
            booking: Some(booking),
            payment_id: Some(payment_id),
            checkout_url: Some(checkout_url),
        }
    }

    pub fn capacity_exhausted(available_rooms: i32) -> Self {
        Self {
            success: false,
            outcome: AdmissionOutcome::CapacityExhausted,
            message: format!("Not enough rooms available ({} left)", available_rooms),
            booking: None,
            payment_id: None,
            checkout_url: None,
        }
    }

    pub fn payment_degraded(booking: BookingDetails) -> Self {
        Self {
            success: false,
            outcome: AdmissionOutcome::PaymentDegraded,
            message: "Failed to create payment entry".to_string(),
            booking: Some(booking),
            payment_id: None,
            checkout_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingStatusResponse {
    pub booking_id: i64,
    pub hotel_id: i64,
    pub num_rooms: i32,
    pub num_days: i32,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub booking_time: DateTime<Utc>,
    pub status: BookingStatus,
    pub payment_status: Option<PaymentStatus>,
    pub total_cost: Option<BigDecimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentStatusResponse {
    pub payment_id: Uuid,
    pub booking_id: i64,
    pub checkout_session_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub error: String,
}

/// Envelope of a gateway notification. Only the fields the reconciler reads
/// are modelled; everything else in the body is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created: i64,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookData {
    pub object: CheckoutObject,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutObject {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
    Unhandled,
}

impl PaymentOutcome {
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            "checkout.session.completed"
            | "checkout.session.async_payment_succeeded"
            | "payment_intent.succeeded" => PaymentOutcome::Succeeded,
            "checkout.session.async_payment_failed" | "payment_intent.payment_failed" => {
                PaymentOutcome::Failed
            }
            _ => PaymentOutcome::Unhandled,
        }
    }
}

impl WebhookEvent {
    pub fn new(event_type: &str, session_id: &str, booking_id: i64, payment_id: Uuid) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(BOOKING_ID_FIELD.to_string(), booking_id.to_string());
        metadata.insert(PAYMENT_ID_FIELD.to_string(), payment_id.to_string());

        Self {
            id: format!("evt_{}", Uuid::new_v4().simple()),
            event_type: event_type.to_string(),
            created: Utc::now().timestamp(),
            data: WebhookData {
                object: CheckoutObject {
                    id: session_id.to_string(),
                    metadata,
                },
            },
        }
    }

    pub fn outcome(&self) -> PaymentOutcome {
        PaymentOutcome::from_event_type(&self.event_type)
    }
}
