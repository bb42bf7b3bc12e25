use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Event type tags this service has dedicated handlers for. The provider's
/// vocabulary is open ended; anything else is acknowledged and ignored.
pub mod event_types {
    pub const PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";
    pub const PAYMENT_INTENT_FAILED: &str = "payment_intent.payment_failed";
    pub const INVOICE_PAYMENT_SUCCEEDED: &str = "invoice.payment_succeeded";
    pub const INVOICE_PAYMENT_FAILED: &str = "invoice.payment_failed";
    pub const SUBSCRIPTION_CREATED: &str = "customer.subscription.created";
    pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";
}

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("event is missing an id")]
    MissingId,
    #[error("event is missing a type")]
    MissingType,
}

/// A provider notification as delivered to `/webhook`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub livemode: bool,
    #[serde(skip, default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    /// Parse an already-verified payload.
    pub fn from_slice(payload: &[u8]) -> Result<Self, EventParseError> {
        let event: WebhookEvent = serde_json::from_slice(payload)?;
        if event.id.trim().is_empty() {
            return Err(EventParseError::MissingId);
        }
        if event.event_type.trim().is_empty() {
            return Err(EventParseError::MissingType);
        }
        Ok(event)
    }

    /// `data.object.id`, the provider id of the object the event is about.
    pub fn object_id(&self) -> Option<&str> {
        self.object_str("id")
    }

    pub fn object_str(&self, key: &str) -> Option<&str> {
        self.data.object.get(key).and_then(|v| v.as_str())
    }

    pub fn object_i64(&self, key: &str) -> Option<i64> {
        self.data.object.get(key).and_then(|v| v.as_i64())
    }
}
