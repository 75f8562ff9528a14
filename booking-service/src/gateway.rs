use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway responded with {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed gateway response: {0}")]
    MalformedResponse(String),
    #[error("amount cannot be charged: {0}")]
    InvalidAmount(String),
}

/// What the gateway needs to host a checkout. `amount_minor` is in the
/// currency's minor unit (paise for INR).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub reference: String,
    pub metadata: HashMap<String, String>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckoutSession {
    #[serde(rename = "id")]
    pub session_id: String,
    pub url: String,
}

#[async_trait]
pub trait CheckoutGateway: Send + Sync + 'static {
    async fn create_session(&self, request: CheckoutRequest) -> Result<CheckoutSession, GatewayError>;
}

/// Hosted-checkout gateway reached over HTTPS with a bearer key.
pub struct HttpCheckoutGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpCheckoutGateway {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl CheckoutGateway for HttpCheckoutGateway {
    async fn create_session(&self, request: CheckoutRequest) -> Result<CheckoutSession, GatewayError> {
        let url = format!("{}/checkout/sessions", self.base_url);
        debug!("Opening checkout session for {} at {}", request.reference, url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Checkout session for {} rejected: {}", request.reference, status);
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let session = response
            .json::<CheckoutSession>()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
        if session.session_id.is_empty() || session.url.is_empty() {
            return Err(GatewayError::MalformedResponse(
                "session id or url is empty".to_string(),
            ));
        }
        Ok(session)
    }
}
