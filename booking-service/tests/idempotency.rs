mod common;

use booking_service::clock::{Clock, SystemClock};
use booking_service::idempotency::{canonical_json, IdempotencyResolver, Resolution};
use booking_service::ServiceError;
use common::TestApp;
use shared::*;
use std::sync::Arc;

#[tokio::test]
async fn replays_return_the_recorded_response_without_new_work() {
    let app = TestApp::new();
    let hotel = app.seed_hotel(5, 1_000).await;
    let request = app.request(hotel.id, 2, 2);

    let first = app
        .bookings
        .book_hotel(7, Some("retry-me"), request.clone())
        .await
        .unwrap();
    for _ in 0..3 {
        let replay = app
            .bookings
            .book_hotel(7, Some("retry-me"), request.clone())
            .await
            .unwrap();
        assert_eq!(replay, first);
    }

    assert_eq!(app.available_rooms(hotel.id).await, 3);
    assert_eq!(app.gateway.calls(), 1);
}

#[tokio::test]
async fn different_payload_under_same_key_conflicts_every_time() {
    let app = TestApp::new();
    let hotel = app.seed_hotel(5, 1_000).await;

    app.bookings
        .book_hotel(7, Some("reused"), app.request(hotel.id, 1, 2))
        .await
        .unwrap();

    for _ in 0..2 {
        let result = app
            .bookings
            .book_hotel(7, Some("reused"), app.request(hotel.id, 2, 2))
            .await;
        assert!(matches!(result, Err(ServiceError::ConflictingRequest)));
    }
    assert_eq!(app.available_rooms(hotel.id).await, 4);
}

#[tokio::test]
async fn key_belongs_to_the_user_who_first_used_it() {
    let app = TestApp::new();
    let hotel = app.seed_hotel(5, 1_000).await;
    let request = app.request(hotel.id, 1, 1);

    app.bookings
        .book_hotel(7, Some("mine"), request.clone())
        .await
        .unwrap();
    let result = app.bookings.book_hotel(8, Some("mine"), request).await;

    assert!(matches!(result, Err(ServiceError::ConflictingRequest)));
}

#[tokio::test]
async fn capacity_rejection_is_replayed_too() {
    let app = TestApp::new();
    let hotel = app.seed_hotel(1, 1_000).await;
    let request = app.request(hotel.id, 2, 1);

    let rejected = app
        .bookings
        .book_hotel(7, Some("too-many"), request.clone())
        .await
        .unwrap();
    assert_eq!(rejected.outcome, AdmissionOutcome::CapacityExhausted);

    let replay = app
        .bookings
        .book_hotel(7, Some("too-many"), request)
        .await
        .unwrap();
    assert_eq!(replay, rejected);
}

#[tokio::test]
async fn earlier_record_wins_a_concurrent_write() {
    let app = TestApp::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let resolver = IdempotencyResolver::new(app.store.clone(), clock);
    let request = app.request(1, 1, 1);

    let winner = resolver
        .record("shared-key", 7, &request, BookHotelResponse::capacity_exhausted(0))
        .await
        .unwrap();
    let loser = resolver
        .record("shared-key", 7, &request, BookHotelResponse::capacity_exhausted(3))
        .await
        .unwrap();

    assert_eq!(loser, winner);
    assert_eq!(
        resolver.resolve(Some("shared-key"), 7, &request).await.unwrap(),
        Resolution::Replay(winner)
    );
}

#[tokio::test]
async fn unseen_key_proceeds() {
    let app = TestApp::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let resolver = IdempotencyResolver::new(app.store.clone(), clock);

    let resolution = resolver
        .resolve(Some("fresh"), 7, &app.request(1, 1, 1))
        .await
        .unwrap();
    assert_eq!(resolution, Resolution::Proceed);
}

#[test]
fn canonical_form_ignores_key_order_and_whitespace() {
    let a: serde_json::Value =
        serde_json::from_str(r#"{"num_rooms":2,"hotel_id":1,"check_in_date":"2025-03-08","num_days":1}"#)
            .unwrap();
    let b: serde_json::Value = serde_json::from_str(
        r#"{ "hotel_id": 1,
             "num_days": 1,
             "check_in_date": "2025-03-08",
             "num_rooms": 2 }"#,
    )
    .unwrap();

    assert_eq!(canonical_json(&a), canonical_json(&b));
}

#[test]
fn canonical_form_sorts_nested_keys() {
    let value = serde_json::json!({
        "hotel_id": 1,
        "extras": [{"z": true, "a": null}],
        "dates": {"out": "2025-03-09", "in": "2025-03-08"}
    });

    assert_eq!(
        canonical_json(&value),
        r#"{"dates":{"in":"2025-03-08","out":"2025-03-09"},"extras":[{"a":null,"z":true}],"hotel_id":1}"#
    );
}
