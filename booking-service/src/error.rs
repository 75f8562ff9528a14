use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use shared::ErrorResponse;
use thiserror::Error;
use tracing::error;
use crate::gateway::GatewayError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Idempotency-Key header is required")]
    MissingIdempotencyKey,
    #[error("idempotency key was already used with a different request")]
    ConflictingRequest,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("hotel {0} not found")]
    HotelNotFound(i64),
    #[error("booking {0} not found")]
    BookingNotFound(i64),
    #[error("payment {0} not found")]
    PaymentNotFound(String),
    #[error("webhook signature is invalid")]
    InvalidSignature,
    #[error("webhook metadata missing or invalid: {0}")]
    MetadataMissing(String),
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
    #[error("payment gateway failure: {0}")]
    Gateway(#[from] GatewayError),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::MissingIdempotencyKey
            | ServiceError::InvalidRequest(_)
            | ServiceError::InvalidSignature
            | ServiceError::MetadataMissing(_) => StatusCode::BAD_REQUEST,
            ServiceError::ConflictingRequest => StatusCode::CONFLICT,
            ServiceError::HotelNotFound(_)
            | ServiceError::BookingNotFound(_)
            | ServiceError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Store(StoreError::LockTimeout) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Gateway(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::MissingIdempotencyKey => "ERR_MISSING_IDEMPOTENCY_KEY",
            ServiceError::ConflictingRequest => "ERR_CONFLICTING_REQUEST",
            ServiceError::InvalidRequest(_) => "ERR_INVALID_REQUEST",
            ServiceError::HotelNotFound(_) => "ERR_HOTEL_NOT_FOUND",
            ServiceError::BookingNotFound(_) => "ERR_BOOKING_NOT_FOUND",
            ServiceError::PaymentNotFound(_) => "ERR_PAYMENT_NOT_FOUND",
            ServiceError::InvalidSignature => "ERR_INVALID_SIGNATURE",
            ServiceError::MetadataMissing(_) => "ERR_METADATA_MISSING",
            ServiceError::Store(StoreError::LockTimeout) => "ERR_LOCK_TIMEOUT",
            ServiceError::Store(_) => "ERR_INTERNAL",
            ServiceError::Gateway(_) => "ERR_PAYMENT_GATEWAY",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = ErrorResponse {
            code: self.code().to_string(),
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
