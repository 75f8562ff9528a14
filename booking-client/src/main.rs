use anyhow::{bail, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use shared::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "booking-client")]
struct Args {
    #[arg(long, env = "BOOKING_SERVICE_URL", default_value = "http://localhost:8080")]
    base_url: String,

    /// Sent as X-User-Id, standing in for the auth layer.
    #[arg(long, env = "BOOKING_USER_ID", default_value = "1")]
    user_id: i64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit one or more booking requests
    Book {
        #[arg(long)]
        hotel_id: i64,

        #[arg(long, default_value = "1")]
        rooms: i32,

        #[arg(long, default_value = "1")]
        days: i32,

        /// YYYY-MM-DD, defaults to tomorrow
        #[arg(long)]
        check_in: Option<String>,

        /// Reuse one key for every request instead of a fresh key each
        #[arg(long)]
        idempotency_key: Option<String>,

        /// Number of requests fired concurrently
        #[arg(long, default_value = "1")]
        parallel: usize,
    },
    /// Sign and deliver a simulated gateway event
    Webhook {
        #[arg(long)]
        booking_id: i64,

        #[arg(long)]
        payment_id: Uuid,

        #[arg(long, default_value = "checkout.session.completed")]
        event_type: String,

        #[arg(long, default_value = "cs_simulated")]
        session_id: String,

        #[arg(long, env = "WEBHOOK_SECRET")]
        secret: String,
    },
    /// Show a booking's status
    Status { booking_id: i64 },
}

struct Client {
    http: reqwest::Client,
    base_url: String,
    user_id: i64,
}

impl Client {
    async fn book(&self, request: &BookHotelRequest, key: &str) -> Result<BookHotelResponse> {
        let response = self
            .http
            .post(format!("{}/bookings", self.base_url))
            .header(IDEMPOTENCY_KEY_HEADER, key)
            .header(USER_ID_HEADER, self.user_id.to_string())
            .json(request)
            .send()
            .await?;
        decode(response).await
    }

    async fn status(&self, booking_id: i64) -> Result<BookingStatusResponse> {
        let response = self
            .http
            .get(format!("{}/bookings/{}", self.base_url, booking_id))
            .send()
            .await?;
        decode(response).await
    }

    async fn deliver(&self, secret: &str, event: &WebhookEvent) -> Result<serde_json::Value> {
        let body = serde_json::to_vec(event)?;
        let signature = sign_payload(secret, Utc::now().timestamp(), &body);
        let response = self
            .http
            .post(format!("{}/webhooks/payments", self.base_url))
            .header(SIGNATURE_HEADER, signature)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("non-success response {}: {}", status, body);
    }
    Ok(response.json::<T>().await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let client = Client {
        http: reqwest::Client::new(),
        base_url: args.base_url.trim_end_matches('/').to_string(),
        user_id: args.user_id,
    };

    match args.command {
        Command::Book {
            hotel_id,
            rooms,
            days,
            check_in,
            idempotency_key,
            parallel,
        } => {
            let check_in_date = check_in.unwrap_or_else(|| {
                (Utc::now().date_naive() + Duration::days(1))
                    .format(DATE_FORMAT)
                    .to_string()
            });
            let request = BookHotelRequest {
                hotel_id,
                num_rooms: rooms,
                num_days: days,
                check_in_date,
            };

            let keys: Vec<String> = (0..parallel.max(1))
                .map(|_| {
                    idempotency_key
                        .clone()
                        .unwrap_or_else(|| Uuid::new_v4().to_string())
                })
                .collect();
            let results = join_all(keys.iter().map(|key| client.book(&request, key))).await;

            let mut reserved = 0;
            for (key, result) in keys.iter().zip(results) {
                match result {
                    Ok(response) => {
                        if response.outcome == AdmissionOutcome::Reserved {
                            reserved += 1;
                        }
                        info!("[{}] {:?}: {}", key, response.outcome, response.message);
                        if let Some(url) = &response.checkout_url {
                            info!("[{}] checkout at {}", key, url);
                        }
                        println!("{}", serde_json::to_string_pretty(&response)?);
                    }
                    Err(e) => warn!("[{}] request failed: {}", key, e),
                }
            }
            info!("{} of {} requests reserved rooms", reserved, keys.len());
        }
        Command::Webhook {
            booking_id,
            payment_id,
            event_type,
            session_id,
            secret,
        } => {
            let event = WebhookEvent::new(&event_type, &session_id, booking_id, payment_id);
            let ack = client.deliver(&secret, &event).await?;
            println!("{}", serde_json::to_string_pretty(&ack)?);
        }
        Command::Status { booking_id } => {
            let status = client.status(booking_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
