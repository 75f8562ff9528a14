use chrono::{DateTime, Utc};
use shared::{BookingStatus, PaymentStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info};
use uuid::Uuid;
use crate::clock::Clock;
use crate::error::ServiceError;
use crate::store::{release_rooms, InventoryStore, StoreError, UnitOfWork};

#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub stale_booking_interval: Duration,
    /// How long a booking may stay `pending` before it is expired.
    pub booking_grace: chrono::Duration,
    pub completed_stay_interval: Duration,
    pub payment_timeout_interval: Duration,
    pub payment_window: chrono::Duration,
    pub batch_size: i64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            stale_booking_interval: Duration::from_secs(60),
            booking_grace: chrono::Duration::minutes(15),
            completed_stay_interval: Duration::from_secs(300),
            payment_timeout_interval: Duration::from_secs(600),
            payment_window: chrono::Duration::minutes(15),
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub applied: usize,
    /// Candidates that changed state between selection and lock.
    pub skipped: usize,
    pub failed: usize,
}

impl SweepReport {
    fn tally(&mut self, sweep: &str, item: &str, result: Result<bool, StoreError>) {
        self.examined += 1;
        match result {
            Ok(true) => self.applied += 1,
            Ok(false) => {
                debug!("{} sweep skipped {}", sweep, item);
                self.skipped += 1;
            }
            Err(e) => {
                error!("{} sweep failed on {}: {}", sweep, item, e);
                self.failed += 1;
            }
        }
    }
}

pub struct ReconciliationScheduler<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    settings: SweepSettings,
}

impl<S: InventoryStore> ReconciliationScheduler<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, settings: SweepSettings) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    /// Expires bookings left `pending` past the grace window, failing their
    /// payment and returning their rooms.
    pub async fn expire_stale_bookings(&self) -> Result<SweepReport, ServiceError> {
        let cutoff = self.clock.now() - self.settings.booking_grace;
        let limit = self.settings.batch_size;
        let candidates = self
            .store
            .transaction(move |uow| {
                Box::pin(async move { uow.stale_pending_bookings(cutoff, limit).await })
            })
            .await?;

        let mut report = SweepReport::default();
        for candidate in candidates {
            let booking_id = candidate.id;
            let result = self
                .store
                .transaction(move |uow| Box::pin(expire_booking(uow, booking_id, cutoff)))
                .await;
            if matches!(result, Ok(true)) {
                info!("Booking {} expired, {} rooms released", booking_id, candidate.num_rooms);
            }
            report.tally("stale-booking", &format!("booking {}", booking_id), result);
        }
        Ok(report)
    }

    /// Completes confirmed bookings whose check-out date has arrived.
    pub async fn release_completed_stays(&self) -> Result<SweepReport, ServiceError> {
        let today = self.clock.today();
        let limit = self.settings.batch_size;
        let candidates = self
            .store
            .transaction(move |uow| Box::pin(async move { uow.finished_stays(today, limit).await }))
            .await?;

        let mut report = SweepReport::default();
        for candidate in candidates {
            let booking_id = candidate.id;
            let result = self
                .store
                .transaction(move |uow| {
                    Box::pin(async move {
                        let Some(booking) = uow.lock_booking(booking_id).await? else {
                            return Ok(false);
                        };
                        if booking.status != BookingStatus::Confirmed || booking.check_out_date > today {
                            return Ok(false);
                        }

                        release_rooms(uow, booking.hotel_id, booking.num_rooms).await?;
                        let next = booking.status.transition_to(BookingStatus::Completed)?;
                        uow.set_booking_status(booking.id, next).await?;
                        Ok(true)
                    })
                })
                .await;
            if matches!(result, Ok(true)) {
                info!("Stay for booking {} completed, {} rooms released", booking_id, candidate.num_rooms);
            }
            report.tally("completed-stay", &format!("booking {}", booking_id), result);
        }
        Ok(report)
    }

    /// Fails payments still `pending` past the payment window whose booking
    /// has already left `pending`. Never touches inventory.
    pub async fn fail_stale_payments(&self) -> Result<SweepReport, ServiceError> {
        let cutoff = self.clock.now() - self.settings.payment_window;
        let limit = self.settings.batch_size;
        let candidates = self
            .store
            .transaction(move |uow| {
                Box::pin(async move { uow.stale_pending_payments(cutoff, limit).await })
            })
            .await?;

        let mut report = SweepReport::default();
        for candidate in candidates {
            let payment_id = candidate.id;
            let booking_id = candidate.booking_id;
            let result = self
                .store
                .transaction(move |uow| Box::pin(fail_payment(uow, payment_id, booking_id)))
                .await;
            if matches!(result, Ok(true)) {
                info!("Payment {} for booking {} timed out", payment_id, booking_id);
            }
            report.tally("payment-timeout", &format!("payment {}", payment_id), result);
        }
        Ok(report)
    }

    pub async fn run_stale_booking_sweep(&self) {
        let mut interval = time::interval(self.settings.stale_booking_interval);

        loop {
            interval.tick().await;
            log_sweep("stale-booking", self.expire_stale_bookings().await);
        }
    }

    pub async fn run_completed_stay_sweep(&self) {
        let mut interval = time::interval(self.settings.completed_stay_interval);

        loop {
            interval.tick().await;
            log_sweep("completed-stay", self.release_completed_stays().await);
        }
    }

    pub async fn run_payment_timeout_sweep(&self) {
        let mut interval = time::interval(self.settings.payment_timeout_interval);

        loop {
            interval.tick().await;
            log_sweep("payment-timeout", self.fail_stale_payments().await);
        }
    }

    /// Starts every sweep on its own task.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let stale = self.clone();
        let completed = self.clone();
        let payments = self;
        vec![
            tokio::spawn(async move { stale.run_stale_booking_sweep().await }),
            tokio::spawn(async move { completed.run_completed_stay_sweep().await }),
            tokio::spawn(async move { payments.run_payment_timeout_sweep().await }),
        ]
    }
}

async fn expire_booking(
    uow: &mut dyn UnitOfWork,
    booking_id: i64,
    cutoff: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let Some(booking) = uow.lock_booking(booking_id).await? else {
        return Ok(false);
    };
    if booking.status != BookingStatus::Pending || booking.created_at >= cutoff {
        return Ok(false);
    }

    if let Some(payment) = uow.find_payment_for_booking(booking_id).await? {
        if let Some(payment) = uow.lock_payment(payment.id).await? {
            if payment.status == PaymentStatus::Pending {
                let next = payment.status.transition_to(PaymentStatus::Failed)?;
                uow.set_payment_status(payment.id, next).await?;
            }
        }
    }

    release_rooms(uow, booking.hotel_id, booking.num_rooms).await?;
    let next = booking.status.transition_to(BookingStatus::Expired)?;
    uow.set_booking_status(booking.id, next).await?;
    Ok(true)
}

async fn fail_payment(
    uow: &mut dyn UnitOfWork,
    payment_id: Uuid,
    booking_id: i64,
) -> Result<bool, StoreError> {
    // pending bookings belong to the stale-booking sweep
    if let Some(booking) = uow.lock_booking(booking_id).await? {
        if booking.status == BookingStatus::Pending {
            return Ok(false);
        }
    }

    let Some(payment) = uow.lock_payment(payment_id).await? else {
        return Ok(false);
    };
    if payment.status != PaymentStatus::Pending {
        return Ok(false);
    }

    let next = payment.status.transition_to(PaymentStatus::Failed)?;
    uow.set_payment_status(payment.id, next).await?;
    Ok(true)
}

fn log_sweep(sweep: &str, result: Result<SweepReport, ServiceError>) {
    match result {
        Ok(report) if report.examined == 0 => debug!("{} sweep found nothing to do", sweep),
        Ok(report) => info!(
            "{} sweep: examined {}, applied {}, skipped {}, failed {}",
            sweep, report.examined, report.applied, report.skipped, report.failed
        ),
        Err(e) => error!("{} sweep could not select candidates: {}", sweep, e),
    }
}
