use axum::{http::{StatusCode, HeaderValue}, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use uuid::Uuid;

pub const ERROR_CODE_HEADER: &str = "X-Error-Code";

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub code: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")] pub trace_id: Option<Uuid>,
}

/// HTTP-facing error. Every variant renders `{code, error, trace_id?}` and
/// mirrors `code` into the `X-Error-Code` header for metrics.
#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: &'static str, message: String, trace_id: Option<Uuid> },
    NotFound { code: &'static str, trace_id: Option<Uuid> },
    Internal { code: &'static str, message: String, trace_id: Option<Uuid> },
    Unavailable { code: &'static str, message: String, trace_id: Option<Uuid> },
}

impl ApiError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest { code, message: message.into(), trace_id: None }
    }

    pub fn internal(code: &'static str, message: impl Into<String>, trace_id: Option<Uuid>) -> Self {
        Self::Internal { code, message: message.into(), trace_id }
    }

    pub fn unavailable(code: &'static str, message: impl Into<String>, trace_id: Option<Uuid>) -> Self {
        Self::Unavailable { code, message: message.into(), trace_id }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest { code, .. }
            | ApiError::NotFound { code, .. }
            | ApiError::Internal { code, .. }
            | ApiError::Unavailable { code, .. } => code,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_code = self.code();
        let body = match self {
            ApiError::BadRequest { code, message, trace_id } => ErrorBody { code: code.into(), error: message, trace_id },
            ApiError::NotFound { code, trace_id } => ErrorBody { code: code.into(), error: "Not found".into(), trace_id },
            ApiError::Internal { code, message, trace_id } => ErrorBody { code: code.into(), error: message, trace_id },
            ApiError::Unavailable { code, message, trace_id } => ErrorBody { code: code.into(), error: message, trace_id },
        };
        let mut resp = (status, Json(body)).into_response();
        if let Ok(val) = HeaderValue::from_str(error_code) {
            resp.headers_mut().insert(ERROR_CODE_HEADER, val);
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
