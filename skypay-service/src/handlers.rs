use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::events::{event_types, WebhookEvent};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Worth another delivery; the claim is released.
    #[error("transient handler failure: {0}")]
    Transient(String),
    /// Will never succeed; recorded as failed and acknowledged.
    #[error("permanent handler failure: {0}")]
    Permanent(String),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &WebhookEvent) -> Result<(), HandlerError>;
}

/// Result of looking up a handler for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    Unhandled,
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry wired with the handlers for every event type we act on.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(event_types::PAYMENT_INTENT_SUCCEEDED, Arc::new(PaymentSucceeded));
        registry.register(event_types::PAYMENT_INTENT_FAILED, Arc::new(PaymentFailed));
        registry.register(event_types::INVOICE_PAYMENT_SUCCEEDED, Arc::new(InvoicePaid));
        registry.register(event_types::INVOICE_PAYMENT_FAILED, Arc::new(InvoicePaymentFailed));
        registry.register(event_types::SUBSCRIPTION_CREATED, Arc::new(SubscriptionCreated));
        registry.register(event_types::SUBSCRIPTION_DELETED, Arc::new(SubscriptionDeleted));
        registry
    }

    /// Replaces any handler already registered for `event_type`.
    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) -> &mut Self {
        self.handlers.insert(event_type.into(), handler);
        self
    }

    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub async fn dispatch(&self, event: &WebhookEvent) -> Result<Dispatch, HandlerError> {
        match self.handlers.get(&event.event_type) {
            Some(handler) => {
                handler.handle(event).await?;
                Ok(Dispatch::Handled)
            }
            None => {
                info!(event_id = %event.id, event_type = %event.event_type, "Unhandled event type");
                Ok(Dispatch::Unhandled)
            }
        }
    }
}

fn require_object_id(event: &WebhookEvent) -> Result<&str, HandlerError> {
    event
        .object_id()
        .ok_or_else(|| HandlerError::Permanent(format!("{} event {} has no data.object.id", event.event_type, event.id)))
}

pub struct PaymentSucceeded;

#[async_trait]
impl EventHandler for PaymentSucceeded {
    async fn handle(&self, event: &WebhookEvent) -> Result<(), HandlerError> {
        let intent_id = require_object_id(event)?;
        info!(
            event_id = %event.id,
            payment_intent = intent_id,
            amount = event.object_i64("amount_received").or_else(|| event.object_i64("amount")),
            currency = event.object_str("currency"),
            "Payment succeeded"
        );
        Ok(())
    }
}

pub struct PaymentFailed;

#[async_trait]
impl EventHandler for PaymentFailed {
    async fn handle(&self, event: &WebhookEvent) -> Result<(), HandlerError> {
        let intent_id = require_object_id(event)?;
        let reason = event
            .data
            .object
            .get("last_payment_error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("unknown");
        warn!(event_id = %event.id, payment_intent = intent_id, reason, "Payment failed");
        Ok(())
    }
}

pub struct InvoicePaid;

#[async_trait]
impl EventHandler for InvoicePaid {
    async fn handle(&self, event: &WebhookEvent) -> Result<(), HandlerError> {
        let invoice_id = require_object_id(event)?;
        info!(
            event_id = %event.id,
            invoice = invoice_id,
            subscription = event.object_str("subscription"),
            amount_paid = event.object_i64("amount_paid"),
            "Invoice payment succeeded"
        );
        Ok(())
    }
}

pub struct InvoicePaymentFailed;

#[async_trait]
impl EventHandler for InvoicePaymentFailed {
    async fn handle(&self, event: &WebhookEvent) -> Result<(), HandlerError> {
        let invoice_id = require_object_id(event)?;
        warn!(
            event_id = %event.id,
            invoice = invoice_id,
            customer = event.object_str("customer"),
            attempt_count = event.object_i64("attempt_count"),
            "Invoice payment failed"
        );
        Ok(())
    }
}

pub struct SubscriptionCreated;

#[async_trait]
impl EventHandler for SubscriptionCreated {
    async fn handle(&self, event: &WebhookEvent) -> Result<(), HandlerError> {
        let subscription_id = require_object_id(event)?;
        info!(
            event_id = %event.id,
            subscription = subscription_id,
            customer = event.object_str("customer"),
            status = event.object_str("status"),
            "Subscription created"
        );
        Ok(())
    }
}

pub struct SubscriptionDeleted;

#[async_trait]
impl EventHandler for SubscriptionDeleted {
    async fn handle(&self, event: &WebhookEvent) -> Result<(), HandlerError> {
        let subscription_id = require_object_id(event)?;
        info!(
            event_id = %event.id,
            subscription = subscription_id,
            customer = event.object_str("customer"),
            "Subscription cancelled"
        );
        Ok(())
    }
}
