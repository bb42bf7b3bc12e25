//! `POST /webhook`: verify, deduplicate, dispatch.
//!
//! The provider retries anything that is not a 2xx, so the response code is
//! the only lever: 400 drops a delivery for good, 503 asks for another one,
//! and 200 is returned once the event has been handled or recognised as a
//! duplicate, whatever the business outcome.

use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::app::AppState;
use crate::error::ServiceError;
use crate::event_store::{Claim, EventStatus};
use crate::events::WebhookEvent;
use crate::handlers::{Dispatch, HandlerError};
use crate::signature::SIGNATURE_HEADER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    Ignored,
    /// Already handled or being handled by another delivery.
    Duplicate,
    /// Handler gave up permanently; recorded and acknowledged.
    Failed,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed => "processed",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Failed => "failed",
        }
    }
}

pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ServiceError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let event = match state.verifier.construct_event(&body, signature, Utc::now().timestamp()) {
        Ok(event) => event,
        Err(err) => {
            let err = ServiceError::from(err);
            warn!(code = err.code(), error = %err, "Rejected webhook delivery");
            state.metrics.record_signature_failure(err.code());
            return Err(err);
        }
    };

    let outcome = ingest(&state, &event).await?;
    state.metrics.record_webhook_outcome(outcome.as_str());
    Ok(Json(json!({ "received": true })))
}

/// Claim `event`, run its handler at most once per live claim, and record the result.
pub async fn ingest(state: &AppState, event: &WebhookEvent) -> Result<WebhookOutcome, ServiceError> {
    let attempt = match state.events.claim(event).await? {
        Claim::Acquired { attempt } => attempt,
        Claim::Completed(status) => {
            info!(event_id = %event.id, event_type = %event.event_type, status = status.as_str(), "Duplicate webhook delivery");
            return Ok(WebhookOutcome::Duplicate);
        }
        Claim::InFlight => {
            info!(event_id = %event.id, event_type = %event.event_type, "Webhook delivery already in flight");
            return Ok(WebhookOutcome::Duplicate);
        }
    };

    let (status, detail, outcome) = match state.handlers.dispatch(event).await {
        Ok(Dispatch::Handled) => {
            info!(event_id = %event.id, event_type = %event.event_type, attempt, "Webhook event processed");
            (EventStatus::Processed, None, WebhookOutcome::Processed)
        }
        Ok(Dispatch::Unhandled) => (EventStatus::Ignored, None, WebhookOutcome::Ignored),
        Err(HandlerError::Permanent(reason)) => {
            error!(event_id = %event.id, event_type = %event.event_type, attempt, reason = %reason, "Webhook handler failed permanently");
            (EventStatus::Failed, Some(reason), WebhookOutcome::Failed)
        }
        Err(HandlerError::Transient(reason)) => {
            if let Err(err) = state.events.release(&event.id, attempt, &reason).await {
                warn!(event_id = %event.id, error = %err, "Failed to release webhook claim; lease expiry will free it");
            }
            state.metrics.record_webhook_outcome("retry");
            return Err(ServiceError::HandlerTransient(reason));
        }
    };

    // The handler already ran; failing here would only cause a second dispatch.
    if let Err(err) = state.events.complete(&event.id, attempt, status, detail.as_deref()).await {
        error!(event_id = %event.id, status = status.as_str(), error = %err, "Failed to record webhook outcome");
    }
    Ok(outcome)
}
