use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntentRequest {
    /// Minor units.
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("payment provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected payment provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Message that may be shown to API callers.
    pub fn public_message(&self) -> &str {
        match self {
            ProviderError::Api { message, .. } => message,
            ProviderError::Transport(_) | ProviderError::Decode(_) => "Payment provider request failed",
        }
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
        idempotency_key: Option<&str>,
    ) -> Result<PaymentIntent, ProviderError>;
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

/// Server-side client for the provider's REST API.
#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    api_base: String,
    secret_key: String,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.api_base)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl StripeClient {
    pub fn new(http: Client, api_base: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        }
    }
}

/// Decode an error response body into the provider's message, falling back to the status line.
pub(crate) async fn api_error(resp: reqwest::Response) -> ProviderError {
    let status = resp.status();
    let message = resp
        .json::<ApiErrorEnvelope>()
        .await
        .ok()
        .and_then(|e| e.error.message)
        .unwrap_or_else(|| format!("payment provider returned {status}"));
    ProviderError::Api { status: status.as_u16(), message }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
        idempotency_key: Option<&str>,
    ) -> Result<PaymentIntent, ProviderError> {
        let url = format!("{}/v1/payment_intents", self.api_base);
        let amount = request.amount.to_string();
        let form = [
            ("amount", amount.as_str()),
            ("currency", request.currency.as_str()),
            ("automatic_payment_methods[enabled]", "true"),
        ];
        let mut call = self.http.post(&url).bearer_auth(&self.secret_key).form(&form);
        if let Some(key) = idempotency_key {
            call = call.header("Idempotency-Key", key);
        }
        let resp = call.send().await?;
        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }
        resp.json::<PaymentIntent>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

/// Offline provider for local development and tests.
#[derive(Debug, Default, Clone)]
pub struct StubProvider;

impl StubProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PaymentProvider for StubProvider {
    async fn create_payment_intent(
        &self,
        _request: &PaymentIntentRequest,
        _idempotency_key: Option<&str>,
    ) -> Result<PaymentIntent, ProviderError> {
        let id = format!("pi_{}", Uuid::new_v4().simple());
        let client_secret = format!("{}_secret_{}", id, Uuid::new_v4().simple());
        Ok(PaymentIntent { id, client_secret, status: Some("requires_payment_method".into()) })
    }
}
