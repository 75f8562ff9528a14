pub mod admission;
pub mod api;
pub mod clock;
pub mod error;
pub mod gateway;
pub mod idempotency;
pub mod models;
pub mod scheduler;
pub mod schema;
pub mod store;
pub mod webhook;

pub use admission::{AdmissionSettings, BookingService};
pub use clock::{Clock, SystemClock};
pub use error::ServiceError;
pub use scheduler::{ReconciliationScheduler, SweepReport, SweepSettings};
pub use store::{InventoryStore, MemoryStore, PgStore, StoreError, UnitOfWork};
pub use webhook::{WebhookEffect, WebhookReconciler, WebhookSettings};
