#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use booking_service::admission::{AdmissionSettings, BookingService};
use booking_service::clock::Clock;
use booking_service::gateway::{CheckoutGateway, CheckoutRequest, CheckoutSession, GatewayError};
use booking_service::models::*;
use booking_service::scheduler::{ReconciliationScheduler, SweepSettings};
use booking_service::store::{InventoryStore, MemoryStore, StoreError, UnitOfWork};
use booking_service::webhook::{WebhookReconciler, WebhookSettings};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use futures::future::BoxFuture;
use shared::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Gateway double. It can fail outright, or sneak a conflicting payment row
/// in so the service's own insert fails after a successful session.
pub struct StubGateway {
    store: Arc<MemoryStore>,
    pub requests: Mutex<Vec<CheckoutRequest>>,
    pub fail: AtomicBool,
    pub preempt_payment_row: AtomicBool,
}

impl StubGateway {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            requests: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            preempt_payment_row: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CheckoutGateway for StubGateway {
    async fn create_session(&self, request: CheckoutRequest) -> Result<CheckoutSession, GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                status: 503,
                body: "gateway unavailable".to_string(),
            });
        }

        if self.preempt_payment_row.load(Ordering::SeqCst) {
            let booking_id: i64 = request.metadata[BOOKING_ID_FIELD].parse().unwrap();
            let squatter = NewPayment {
                id: Uuid::new_v4(),
                booking_id,
                checkout_session_id: "cs_squatter".to_string(),
                checkout_url: None,
                amount: BigDecimal::from(1),
                currency: "INR".to_string(),
                created_at: Utc::now(),
            };
            self.store
                .transaction(move |uow| Box::pin(async move { uow.insert_payment(squatter).await }))
                .await
                .unwrap();
        }

        let mut requests = self.requests.lock().unwrap();
        requests.push(request);
        let session_id = format!("cs_test_{}", requests.len());
        Ok(CheckoutSession {
            url: format!("https://checkout.test/pay/{}", session_id),
            session_id,
        })
    }
}

/// Store that fails every status write to one booking, leaving the rest of
/// the unit of work to the wrapped memory store.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    broken_booking: i64,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>, broken_booking: i64) -> Self {
        Self {
            inner,
            broken_booking,
        }
    }
}

#[async_trait]
impl InventoryStore for FlakyStore {
    async fn transaction<R, F>(&self, work: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn UnitOfWork) -> BoxFuture<'t, Result<R, StoreError>>
            + Send
            + 'static,
    {
        let broken_booking = self.broken_booking;
        self.inner
            .transaction(move |uow| {
                Box::pin(async move {
                    let mut flaky = FlakyUnitOfWork {
                        inner: uow,
                        broken_booking,
                    };
                    work(&mut flaky).await
                })
            })
            .await
    }
}

struct FlakyUnitOfWork<'a> {
    inner: &'a mut (dyn UnitOfWork + 'a),
    broken_booking: i64,
}

#[async_trait]
impl UnitOfWork for FlakyUnitOfWork<'_> {
    async fn insert_hotel(&mut self, hotel: NewHotel) -> Result<Hotel, StoreError> {
        self.inner.insert_hotel(hotel).await
    }

    async fn find_hotel(&mut self, id: i64) -> Result<Option<Hotel>, StoreError> {
        self.inner.find_hotel(id).await
    }

    async fn lock_hotel(&mut self, id: i64) -> Result<Option<Hotel>, StoreError> {
        self.inner.lock_hotel(id).await
    }

    async fn adjust_available_rooms(&mut self, id: i64, delta: i32) -> Result<Hotel, StoreError> {
        self.inner.adjust_available_rooms(id, delta).await
    }

    async fn insert_booking(&mut self, booking: NewBooking) -> Result<Booking, StoreError> {
        self.inner.insert_booking(booking).await
    }

    async fn find_booking(&mut self, id: i64) -> Result<Option<Booking>, StoreError> {
        self.inner.find_booking(id).await
    }

    async fn lock_booking(&mut self, id: i64) -> Result<Option<Booking>, StoreError> {
        self.inner.lock_booking(id).await
    }

    async fn set_booking_status(&mut self, id: i64, status: BookingStatus) -> Result<(), StoreError> {
        if id == self.broken_booking {
            return Err(StoreError::Pool("connection reset".to_string()));
        }
        self.inner.set_booking_status(id, status).await
    }

    async fn stale_pending_bookings(
        &mut self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Booking>, StoreError> {
        self.inner.stale_pending_bookings(created_before, limit).await
    }

    async fn finished_stays(&mut self, as_of: NaiveDate, limit: i64) -> Result<Vec<Booking>, StoreError> {
        self.inner.finished_stays(as_of, limit).await
    }

    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment, StoreError> {
        self.inner.insert_payment(payment).await
    }

    async fn find_payment(&mut self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        self.inner.find_payment(id).await
    }

    async fn lock_payment(&mut self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        self.inner.lock_payment(id).await
    }

    async fn find_payment_for_booking(&mut self, booking_id: i64) -> Result<Option<Payment>, StoreError> {
        self.inner.find_payment_for_booking(booking_id).await
    }

    async fn set_payment_status(&mut self, id: Uuid, status: PaymentStatus) -> Result<(), StoreError> {
        self.inner.set_payment_status(id, status).await
    }

    async fn stale_pending_payments(
        &mut self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, StoreError> {
        self.inner.stale_pending_payments(created_before, limit).await
    }

    async fn find_idempotency_key(&mut self, key: &str) -> Result<Option<IdempotencyRecord>, StoreError> {
        self.inner.find_idempotency_key(key).await
    }

    async fn insert_idempotency_key(&mut self, record: IdempotencyRecord) -> Result<(), StoreError> {
        self.inner.insert_idempotency_key(record).await
    }
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<StubGateway>,
    pub bookings: Arc<BookingService<MemoryStore>>,
    pub webhooks: Arc<WebhookReconciler<MemoryStore>>,
    pub scheduler: Arc<ReconciliationScheduler<MemoryStore>>,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(ManualClock::starting_at(
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
        ));
        let gateway = Arc::new(StubGateway::new(store.clone()));
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        let bookings = Arc::new(BookingService::new(
            store.clone(),
            gateway.clone(),
            dyn_clock.clone(),
            AdmissionSettings::default(),
        ));
        let webhooks = Arc::new(WebhookReconciler::new(
            store.clone(),
            dyn_clock.clone(),
            WebhookSettings::new(WEBHOOK_SECRET),
        ));
        let scheduler = Arc::new(ReconciliationScheduler::new(
            store.clone(),
            dyn_clock,
            SweepSettings::default(),
        ));

        Self {
            store,
            clock,
            gateway,
            bookings,
            webhooks,
            scheduler,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// A request checking in a week from the test clock's today.
    pub fn request(&self, hotel_id: i64, num_rooms: i32, num_days: i32) -> BookHotelRequest {
        self.request_from(hotel_id, num_rooms, num_days, self.today() + Duration::days(7))
    }

    pub fn request_from(
        &self,
        hotel_id: i64,
        num_rooms: i32,
        num_days: i32,
        check_in: NaiveDate,
    ) -> BookHotelRequest {
        BookHotelRequest {
            hotel_id,
            num_rooms,
            num_days,
            check_in_date: check_in.format(DATE_FORMAT).to_string(),
        }
    }

    pub async fn seed_hotel(&self, rooms: i32, cost_per_night: i64) -> Hotel {
        self.store
            .transaction(move |uow| {
                Box::pin(async move {
                    uow.insert_hotel(NewHotel::new(
                        "Lakeside Residency",
                        rooms,
                        BigDecimal::from(cost_per_night),
                    ))
                    .await
                })
            })
            .await
            .unwrap()
    }

    pub async fn hotel(&self, id: i64) -> Hotel {
        self.store
            .transaction(move |uow| Box::pin(async move { uow.find_hotel(id).await }))
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn available_rooms(&self, hotel_id: i64) -> i32 {
        self.hotel(hotel_id).await.available_rooms
    }

    pub async fn booking(&self, id: i64) -> Booking {
        self.store
            .transaction(move |uow| Box::pin(async move { uow.find_booking(id).await }))
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn payment_for(&self, booking_id: i64) -> Option<Payment> {
        self.store
            .transaction(move |uow| {
                Box::pin(async move { uow.find_payment_for_booking(booking_id).await })
            })
            .await
            .unwrap()
    }

    /// Books with a fresh idempotency key and returns the response.
    pub async fn book(&self, request: BookHotelRequest) -> BookHotelResponse {
        let key = Uuid::new_v4().to_string();
        self.bookings
            .book_hotel(7, Some(&key), request)
            .await
            .unwrap()
    }

    /// Books and returns `(booking_id, payment_id)` of a reserved booking.
    pub async fn reserve(&self, request: BookHotelRequest) -> (i64, Uuid) {
        let response = self.book(request).await;
        assert_eq!(response.outcome, AdmissionOutcome::Reserved, "{}", response.message);
        (
            response.booking.unwrap().booking_id,
            response.payment_id.unwrap(),
        )
    }

    /// Body and signature header of a gateway event, signed at the test clock's now.
    pub fn signed_event(&self, event_type: &str, booking_id: i64, payment_id: Uuid) -> (String, Vec<u8>) {
        let event = WebhookEvent::new(event_type, "cs_test", booking_id, payment_id);
        let body = serde_json::to_vec(&event).unwrap();
        let header = sign_payload(WEBHOOK_SECRET, self.clock.now().timestamp(), &body);
        (header, body)
    }

    pub async fn deliver(
        &self,
        event_type: &str,
        booking_id: i64,
        payment_id: Uuid,
    ) -> Result<booking_service::WebhookEffect, booking_service::ServiceError> {
        let (header, body) = self.signed_event(event_type, booking_id, payment_id);
        self.webhooks.handle(Some(&header), &body).await
    }
}
