//! Buyer-side checkout flow: ask the backend for a payment intent, then
//! confirm it directly with the provider using the publishable key.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::provider::{ProviderError, DEFAULT_API_BASE};

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("{0}")]
    Backend(String),
    #[error("{0}")]
    Provider(#[from] ProviderError),
    #[error("malformed client secret")]
    MalformedClientSecret,
    #[error("card could not be tokenized: {0}")]
    Card(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Final state of a checkout attempt as shown to the buyer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutStatus {
    Succeeded,
    RequiresAction,
    Declined(String),
    Failed,
}

impl CheckoutStatus {
    pub fn message(&self) -> &str {
        match self {
            CheckoutStatus::Succeeded => "Payment successful!",
            CheckoutStatus::RequiresAction => "Additional authentication required.",
            CheckoutStatus::Declined(message) => message,
            CheckoutStatus::Failed => "Something went wrong.",
        }
    }
}

/// Something that can hand over a tokenized payment method. Raw card numbers
/// never pass through this crate.
#[async_trait]
pub trait CardSource: Send + Sync {
    async fn payment_method(&self) -> Result<String, CheckoutError>;
}

/// A payment method id obtained from the provider's tokenization widget
/// (`pm_...`).
#[derive(Debug, Clone)]
pub struct TokenizedCard {
    payment_method: String,
}

impl TokenizedCard {
    pub fn new(payment_method: impl Into<String>) -> Self {
        Self { payment_method: payment_method.into() }
    }
}

#[async_trait]
impl CardSource for TokenizedCard {
    async fn payment_method(&self) -> Result<String, CheckoutError> {
        if self.payment_method.trim().is_empty() {
            return Err(CheckoutError::Card("empty payment method".into()));
        }
        Ok(self.payment_method.clone())
    }
}

#[derive(Deserialize)]
struct IntentCreated {
    #[serde(rename = "clientSecret")]
    client_secret: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ConfirmedIntent {
    status: String,
}

/// Intent id embedded in a client secret of the form `<id>_secret_<nonce>`.
pub fn intent_id_from_secret(client_secret: &str) -> Option<&str> {
    client_secret
        .split_once("_secret_")
        .map(|(id, _)| id)
        .filter(|id| id.starts_with("pi_") && id.len() > 3)
}

#[derive(Clone)]
pub struct CheckoutClient {
    http: Client,
    backend_url: String,
    provider_url: String,
    publishable_key: String,
}

impl CheckoutClient {
    pub fn new(http: Client, backend_url: impl Into<String>, publishable_key: impl Into<String>) -> Self {
        Self {
            http,
            backend_url: backend_url.into().trim_end_matches('/').to_string(),
            provider_url: DEFAULT_API_BASE.to_string(),
            publishable_key: publishable_key.into(),
        }
    }

    pub fn with_provider_url(mut self, provider_url: impl Into<String>) -> Self {
        self.provider_url = provider_url.into().trim_end_matches('/').to_string();
        self
    }

    pub async fn create_payment_intent(&self, amount: i64, currency: &str) -> Result<String, CheckoutError> {
        let resp = self
            .http
            .post(format!("{}/create-payment-intent", self.backend_url))
            .json(&json!({ "amount": amount, "currency": currency }))
            .send()
            .await?;
        let status = resp.status();
        let body: IntentCreated = resp.json().await?;
        match (status.is_success(), body.client_secret, body.error) {
            (true, Some(secret), _) if !secret.is_empty() => Ok(secret),
            (_, _, Some(error)) => Err(CheckoutError::Backend(error)),
            _ => Err(CheckoutError::Backend(format!("backend returned {status} without a client secret"))),
        }
    }

    pub async fn confirm_card_payment(&self, client_secret: &str, card: &dyn CardSource) -> Result<String, CheckoutError> {
        let intent_id = intent_id_from_secret(client_secret).ok_or(CheckoutError::MalformedClientSecret)?;
        let payment_method = card.payment_method().await?;
        let resp = self
            .http
            .post(format!("{}/v1/payment_intents/{}/confirm", self.provider_url, intent_id))
            .bearer_auth(&self.publishable_key)
            .form(&[("client_secret", client_secret), ("payment_method", payment_method.as_str())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(crate::provider::api_error(resp).await.into());
        }
        let confirmed: ConfirmedIntent = resp.json().await?;
        debug!(payment_intent = intent_id, status = %confirmed.status, "Confirmed payment intent");
        Ok(confirmed.status)
    }

    /// Full checkout. Never fails: every error is folded into a status the buyer can read.
    pub async fn pay(&self, amount: i64, currency: &str, card: &dyn CardSource) -> CheckoutStatus {
        let client_secret = match self.create_payment_intent(amount, currency).await {
            Ok(secret) => secret,
            Err(CheckoutError::Backend(message)) => return CheckoutStatus::Declined(message),
            Err(err) => {
                warn!(error = %err, "Could not create payment intent");
                return CheckoutStatus::Failed;
            }
        };
        match self.confirm_card_payment(&client_secret, card).await {
            Ok(status) if status == "succeeded" => CheckoutStatus::Succeeded,
            Ok(status) if status == "requires_action" => CheckoutStatus::RequiresAction,
            Ok(status) => {
                warn!(status = %status, "Payment left in unexpected state");
                CheckoutStatus::Failed
            }
            Err(CheckoutError::Provider(ProviderError::Api { message, .. })) => CheckoutStatus::Declined(message),
            Err(CheckoutError::Card(message)) => CheckoutStatus::Declined(message),
            Err(err) => {
                warn!(error = %err, "Payment confirmation failed");
                CheckoutStatus::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_intent_id_from_secret() {
        assert_eq!(intent_id_from_secret("pi_3Abc_secret_xyz"), Some("pi_3Abc"));
        assert_eq!(intent_id_from_secret("pi__secret_xyz"), None);
        assert_eq!(intent_id_from_secret("garbage"), None);
        assert_eq!(intent_id_from_secret("seti_1_secret_x"), None);
    }

    #[test]
    fn status_messages() {
        assert_eq!(CheckoutStatus::Succeeded.message(), "Payment successful!");
        assert_eq!(CheckoutStatus::Failed.message(), "Something went wrong.");
        assert_eq!(CheckoutStatus::Declined("Your card was declined.".into()).message(), "Your card was declined.");
    }

    #[tokio::test]
    async fn blank_card_is_rejected() {
        assert!(matches!(TokenizedCard::new(" ").payment_method().await, Err(CheckoutError::Card(_))));
    }
}
