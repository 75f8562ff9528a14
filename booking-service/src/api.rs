use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::HeaderMap,
    response::{Json, Redirect},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use shared::*;
use std::sync::Arc;
use uuid::Uuid;
use crate::admission::BookingService;
use crate::error::ServiceError;
use crate::store::InventoryStore;
use crate::webhook::WebhookReconciler;

pub const MAX_WEBHOOK_BODY_BYTES: usize = 64 * 1024;

pub struct AppState<S> {
    pub bookings: Arc<BookingService<S>>,
    pub webhooks: Arc<WebhookReconciler<S>>,
}

// derive(Clone) would demand S: Clone
impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            bookings: self.bookings.clone(),
            webhooks: self.webhooks.clone(),
        }
    }
}

pub fn create_router<S: InventoryStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/bookings", post(create_booking::<S>))
        .route("/bookings/:booking_id", get(get_booking::<S>))
        .route("/bookings/:booking_id/checkout", get(checkout_redirect::<S>))
        .route("/payments/:payment_id", get(get_payment::<S>))
        .route(
            "/webhooks/payments",
            post(payment_webhook::<S>).layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY_BYTES)),
        )
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// The upstream auth layer forwards the caller's id in `X-User-Id`.
fn user_id(headers: &HeaderMap) -> Result<i64, ServiceError> {
    header_str(headers, USER_ID_HEADER)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or_else(|| ServiceError::InvalidRequest(format!("{} header is required", USER_ID_HEADER)))
}

pub async fn create_booking<S: InventoryStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<BookHotelRequest>,
) -> Result<Json<BookHotelResponse>, ServiceError> {
    let user_id = user_id(&headers)?;
    let key = header_str(&headers, IDEMPOTENCY_KEY_HEADER).map(str::to_string);

    let response = state
        .bookings
        .book_hotel(user_id, key.as_deref(), request)
        .await?;
    Ok(Json(response))
}

pub async fn get_booking<S: InventoryStore>(
    State(state): State<AppState<S>>,
    Path(booking_id): Path<i64>,
) -> Result<Json<BookingStatusResponse>, ServiceError> {
    let status = state.bookings.booking_status(booking_id).await?;
    Ok(Json(status))
}

pub async fn checkout_redirect<S: InventoryStore>(
    State(state): State<AppState<S>>,
    Path(booking_id): Path<i64>,
) -> Result<Redirect, ServiceError> {
    let url = state.bookings.checkout_url(booking_id).await?;
    Ok(Redirect::to(&url))
}

pub async fn get_payment<S: InventoryStore>(
    State(state): State<AppState<S>>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentStatusResponse>, ServiceError> {
    let status = state.bookings.payment_status(payment_id).await?;
    Ok(Json(status))
}

pub async fn payment_webhook<S: InventoryStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ServiceError> {
    let signature = header_str(&headers, SIGNATURE_HEADER).map(str::to_string);

    let effect = state.webhooks.handle(signature.as_deref(), &body).await?;
    Ok(Json(json!({ "received": true, "effect": effect })))
}

pub async fn health_check() -> &'static str {
    "OK"
}
