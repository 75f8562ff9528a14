mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use booking_service::api::{create_router, AppState, MAX_WEBHOOK_BODY_BYTES};
use common::TestApp;
use serde_json::Value;
use shared::*;
use tower::ServiceExt;

fn router(app: &TestApp) -> Router {
    create_router(AppState {
        bookings: app.bookings.clone(),
        webhooks: app.webhooks.clone(),
    })
}

fn booking_request(body: &BookHotelRequest, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/bookings")
        .header(header::CONTENT_TYPE, "application/json")
        .header(USER_ID_HEADER, "7");
    if let Some(key) = key {
        builder = builder.header(IDEMPOTENCY_KEY_HEADER, key);
    }
    builder
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_check_responds() {
    let app = TestApp::new();

    let response = router(&app).oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn booking_flow_over_http() {
    let app = TestApp::new();
    let hotel = app.seed_hotel(5, 2_000).await;
    let request = app.request(hotel.id, 2, 1);

    let response = router(&app)
        .oneshot(booking_request(&request, Some("http-1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: BookHotelResponse = serde_json::from_value(json_body(response).await).unwrap();
    assert_eq!(body.outcome, AdmissionOutcome::Reserved);
    let booking_id = body.booking.unwrap().booking_id;
    let payment_id = body.payment_id.unwrap();

    let response = router(&app)
        .oneshot(get(&format!("/bookings/{}", booking_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status: BookingStatusResponse = serde_json::from_value(json_body(response).await).unwrap();
    assert_eq!(status.status, BookingStatus::Pending);
    assert_eq!(status.payment_status, Some(PaymentStatus::Pending));

    let response = router(&app)
        .oneshot(get(&format!("/bookings/{}/checkout", booking_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers()[header::LOCATION],
        body.checkout_url.unwrap().as_str()
    );

    let response = router(&app)
        .oneshot(get(&format!("/payments/{}", payment_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let payment: PaymentStatusResponse = serde_json::from_value(json_body(response).await).unwrap();
    assert_eq!(payment.booking_id, booking_id);
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn errors_carry_status_and_code() {
    let app = TestApp::new();
    let hotel = app.seed_hotel(5, 2_000).await;

    let response = router(&app)
        .oneshot(booking_request(&app.request(hotel.id, 1, 1), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "ERR_MISSING_IDEMPOTENCY_KEY");

    router(&app)
        .oneshot(booking_request(&app.request(hotel.id, 1, 1), Some("dup")))
        .await
        .unwrap();
    let response = router(&app)
        .oneshot(booking_request(&app.request(hotel.id, 3, 1), Some("dup")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["code"], "ERR_CONFLICTING_REQUEST");

    let response = router(&app).oneshot(get("/bookings/4242")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["code"], "ERR_BOOKING_NOT_FOUND");
}

#[tokio::test]
async fn booking_requires_caller_identity() {
    let app = TestApp::new();
    let hotel = app.seed_hotel(5, 2_000).await;
    let request = Request::builder()
        .method("POST")
        .uri("/bookings")
        .header(header::CONTENT_TYPE, "application/json")
        .header(IDEMPOTENCY_KEY_HEADER, "anon")
        .body(Body::from(
            serde_json::to_vec(&app.request(hotel.id, 1, 1)).unwrap(),
        ))
        .unwrap();

    let response = router(&app).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.available_rooms(hotel.id).await, 5);
}

#[tokio::test]
async fn webhook_endpoint_verifies_and_applies() {
    let app = TestApp::new();
    let hotel = app.seed_hotel(5, 2_000).await;
    let (booking_id, payment_id) = app.reserve(app.request(hotel.id, 3, 2)).await;
    let (signature, body) =
        app.signed_event("checkout.session.async_payment_failed", booking_id, payment_id);

    let unsigned = Request::builder()
        .method("POST")
        .uri("/webhooks/payments")
        .body(Body::from(body.clone()))
        .unwrap();
    let response = router(&app).oneshot(unsigned).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "ERR_INVALID_SIGNATURE");

    let signed = Request::builder()
        .method("POST")
        .uri("/webhooks/payments")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(body))
        .unwrap();
    let response = router(&app).oneshot(signed).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["effect"], "released");
    assert_eq!(app.available_rooms(hotel.id).await, 5);
}

#[tokio::test]
async fn oversized_webhook_body_is_refused() {
    let app = TestApp::new();
    let body = vec![b' '; MAX_WEBHOOK_BODY_BYTES + 1];
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/payments")
        .header(SIGNATURE_HEADER, "t=0,v1=00")
        .body(Body::from(body))
        .unwrap();

    let response = router(&app).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
