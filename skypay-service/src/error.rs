use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use common_http_errors::{ApiError, ERROR_CODE_HEADER};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::event_store::StoreError;
use crate::events::EventParseError;
use crate::provider::ProviderError;
use crate::signature::{ConstructEventError, SignatureError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    SignatureVerification(#[from] SignatureError),
    #[error("Invalid webhook payload: {0}")]
    MalformedEvent(#[from] EventParseError),
    #[error("{message}")]
    Validation { code: &'static str, message: String },
    #[error("payment provider error: {0}")]
    RemoteService(#[from] ProviderError),
    #[error("event store unavailable: {0}")]
    DatabaseUnavailable(#[from] StoreError),
    #[error("Database connection failed")]
    DatabaseProbe(#[source] sqlx::Error),
    #[error("event handler failed, retry later: {0}")]
    HandlerTransient(String),
}

impl From<ConstructEventError> for ServiceError {
    fn from(err: ConstructEventError) -> Self {
        match err {
            ConstructEventError::Signature(e) => ServiceError::SignatureVerification(e),
            ConstructEventError::Payload(e) => ServiceError::MalformedEvent(e),
        }
    }
}

impl ServiceError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        ServiceError::Validation { code, message: message.into() }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::SignatureVerification(e) => e.code(),
            ServiceError::MalformedEvent(_) => "malformed_event",
            ServiceError::Validation { code, .. } => code,
            ServiceError::RemoteService(_) => "payment_provider_error",
            ServiceError::DatabaseUnavailable(_) | ServiceError::DatabaseProbe(_) => "database_unavailable",
            ServiceError::HandlerTransient(_) => "handler_retry",
        }
    }

    fn is_webhook_rejection(&self) -> bool {
        matches!(self, ServiceError::SignatureVerification(_) | ServiceError::MalformedEvent(_))
    }

    /// Webhook rejections go back to the provider as plain text.
    fn webhook_rejection(&self) -> Response {
        let mut resp = (StatusCode::BAD_REQUEST, format!("Webhook Error: {self}")).into_response();
        resp.headers_mut().insert(ERROR_CODE_HEADER, HeaderValue::from_static(self.code()));
        resp
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let code = err.code();
        match err {
            ServiceError::SignatureVerification(e) => ApiError::bad_request(code, e.to_string()),
            ServiceError::MalformedEvent(e) => ApiError::bad_request(code, format!("Invalid webhook payload: {e}")),
            ServiceError::Validation { code, message } => ApiError::bad_request(code, message),
            ServiceError::RemoteService(e) => {
                let trace_id = Uuid::new_v4();
                error!(%trace_id, error = %e, "Payment provider call failed");
                ApiError::internal(code, e.public_message(), Some(trace_id))
            }
            ServiceError::DatabaseUnavailable(e) => {
                let trace_id = Uuid::new_v4();
                error!(%trace_id, error = %e, "Event store unavailable");
                ApiError::internal(code, "Event store unavailable", Some(trace_id))
            }
            ServiceError::DatabaseProbe(e) => {
                let trace_id = Uuid::new_v4();
                error!(%trace_id, error = %e, "Database probe failed");
                ApiError::internal(code, "Database connection failed", Some(trace_id))
            }
            ServiceError::HandlerTransient(reason) => {
                let trace_id = Uuid::new_v4();
                error!(%trace_id, reason = %reason, "Webhook handler failed transiently; requesting redelivery");
                ApiError::unavailable(code, "Event processing failed, retry later", Some(trace_id))
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        if self.is_webhook_rejection() {
            return self.webhook_rejection();
        }
        ApiError::from(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_failure_is_plain_text_400() {
        let resp = ServiceError::from(SignatureError::Mismatch).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(resp.headers().get(ERROR_CODE_HEADER).unwrap(), "sig_mismatch");
        assert!(resp.headers().get("content-type").unwrap().to_str().unwrap().starts_with("text/plain"));
    }

    #[test]
    fn provider_errors_map_to_500_with_trace_id() {
        let err = ServiceError::from(ProviderError::Api { status: 402, message: "Your card was declined.".into() });
        let api = ApiError::from(err);
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        match api {
            ApiError::Internal { code, message, trace_id } => {
                assert_eq!(code, "payment_provider_error");
                assert_eq!(message, "Your card was declined.");
                assert!(trace_id.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn transient_handler_failure_is_503() {
        let api = ApiError::from(ServiceError::HandlerTransient("timeout".into()));
        assert_eq!(api.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(api.code(), "handler_retry");
    }

    #[test]
    fn validation_keeps_its_code() {
        let api = ApiError::from(ServiceError::validation("missing_fields", "Missing amount or currency"));
        assert_eq!(api.status(), StatusCode::BAD_REQUEST);
        assert_eq!(api.code(), "missing_fields");
    }
}
