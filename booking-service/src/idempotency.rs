use serde_json::Value;
use shared::{BookHotelRequest, BookHotelResponse};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;
use crate::clock::Clock;
use crate::error::ServiceError;
use crate::models::IdempotencyRecord;
use crate::store::{InventoryStore, StoreError};

pub const BOOKINGS_ENDPOINT: &str = "/bookings";

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The key was seen with an equivalent request; answer with this.
    Replay(BookHotelResponse),
    Proceed,
}

/// Canonical text of a JSON payload: object keys sorted, no whitespace.
/// Sorting is explicit since map order follows insertion under `preserve_order`.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn canonical_request(request: &BookHotelRequest) -> Result<Value, StoreError> {
    serde_json::to_value(request).map_err(|e| StoreError::Corrupt(e.to_string()))
}

pub struct IdempotencyResolver<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: InventoryStore> IdempotencyResolver<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn resolve(
        &self,
        key: Option<&str>,
        user_id: i64,
        request: &BookHotelRequest,
    ) -> Result<Resolution, ServiceError> {
        let key = match key.map(str::trim) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => return Err(ServiceError::MissingIdempotencyKey),
        };
        let incoming = canonical_json(&canonical_request(request)?);

        let lookup_key = key.clone();
        let existing = self
            .store
            .transaction(move |uow| {
                Box::pin(async move { uow.find_idempotency_key(&lookup_key).await })
            })
            .await?;

        let Some(record) = existing else {
            return Ok(Resolution::Proceed);
        };

        if record.user_id != user_id || record.endpoint != BOOKINGS_ENDPOINT {
            warn!("Idempotency key {} reused outside its original scope", key);
            return Err(ServiceError::ConflictingRequest);
        }
        if canonical_json(&record.request_payload) != incoming {
            warn!("Idempotency key {} reused with a different payload", key);
            return Err(ServiceError::ConflictingRequest);
        }

        let response = serde_json::from_value::<BookHotelResponse>(record.response_payload)
            .map_err(|e| StoreError::Corrupt(format!("idempotency key {}: {}", key, e)))?;
        info!("Replaying recorded response for idempotency key {}", key);
        Ok(Resolution::Replay(response))
    }

    /// Stores `response` under `key` and returns what the caller should see.
    /// When another request recorded the key first, its response wins.
    pub async fn record(
        &self,
        key: &str,
        user_id: i64,
        request: &BookHotelRequest,
        response: BookHotelResponse,
    ) -> Result<BookHotelResponse, ServiceError> {
        let record = IdempotencyRecord {
            id: Uuid::new_v4(),
            idempotency_key: key.trim().to_string(),
            user_id,
            endpoint: BOOKINGS_ENDPOINT.to_string(),
            request_payload: canonical_request(request)?,
            response_payload: serde_json::to_value(&response)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            created_at: self.clock.now(),
        };
        let lookup_key = record.idempotency_key.clone();

        let inserted = self
            .store
            .transaction(move |uow| Box::pin(async move { uow.insert_idempotency_key(record).await }))
            .await;

        match inserted {
            Ok(()) => Ok(response),
            Err(StoreError::Duplicate(_)) => {
                warn!("Idempotency key {} was recorded concurrently, replaying first response", lookup_key);
                let winner = self
                    .store
                    .transaction(move |uow| {
                        Box::pin(async move { uow.find_idempotency_key(&lookup_key).await })
                    })
                    .await?;
                match winner {
                    Some(winner) => serde_json::from_value(winner.response_payload)
                        .map_err(|e| ServiceError::Store(StoreError::Corrupt(e.to_string()))),
                    None => Ok(response),
                }
            }
            Err(e) => {
                error!("Failed to record idempotency key {}: {}", lookup_key, e);
                Ok(response)
            }
        }
    }
}
