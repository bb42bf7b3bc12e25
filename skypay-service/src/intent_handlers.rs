use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use common_http_errors::{ApiError, ApiResult};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::app::AppState;
use crate::error::ServiceError;
use crate::provider::PaymentIntentRequest;

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Serialize)]
pub struct CreatePaymentIntentResponse {
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
}

/// Validate a raw `{amount, currency}` body.
///
/// Missing fields are reported before malformed ones so that `{}` always
/// yields `missing_fields`.
pub fn parse_intent_request(body: &Value) -> Result<PaymentIntentRequest, ServiceError> {
    let amount = body.get("amount").filter(|v| !v.is_null());
    let currency = body.get("currency").filter(|v| !v.is_null());
    let blank_currency = currency.and_then(Value::as_str).is_some_and(|c| c.trim().is_empty());
    let (Some(amount), Some(currency)) = (amount, currency) else {
        return Err(ServiceError::validation("missing_fields", "Missing amount or currency"));
    };
    if blank_currency {
        return Err(ServiceError::validation("missing_fields", "Missing amount or currency"));
    }
    let amount = amount
        .as_i64()
        .filter(|a| *a > 0)
        .ok_or_else(|| ServiceError::validation("invalid_amount", "Amount must be a positive integer in minor units"))?;
    let currency = currency
        .as_str()
        .ok_or_else(|| ServiceError::validation("invalid_currency", "Currency must be a string"))?;
    Ok(PaymentIntentRequest { amount, currency: currency.trim().to_lowercase() })
}

pub async fn create_payment_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<CreatePaymentIntentResponse>> {
    let Json(body) = payload.map_err(|rejection| {
        state.metrics.record_payment_intent("rejected");
        ApiError::bad_request("invalid_json", rejection.body_text())
    })?;
    let request = parse_intent_request(&body).map_err(|err| {
        state.metrics.record_payment_intent("rejected");
        ApiError::from(err)
    })?;
    let idempotency_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty());

    match state.provider.create_payment_intent(&request, idempotency_key).await {
        Ok(intent) => {
            state.metrics.record_payment_intent("created");
            info!(payment_intent = %intent.id, amount = request.amount, currency = %request.currency, "Created payment intent");
            Ok(Json(CreatePaymentIntentResponse { client_secret: intent.client_secret }))
        }
        Err(err) => {
            state.metrics.record_payment_intent("provider_error");
            warn!(amount = request.amount, currency = %request.currency, "Payment intent creation failed");
            Err(ServiceError::from(err).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn code_of(body: Value) -> &'static str {
        parse_intent_request(&body).unwrap_err().code()
    }

    #[test]
    fn accepts_positive_integer_and_lowercases_currency() {
        let req = parse_intent_request(&json!({"amount": 5000, "currency": "USD"})).unwrap();
        assert_eq!(req, PaymentIntentRequest { amount: 5000, currency: "usd".into() });
    }

    #[test]
    fn missing_fields_win_over_bad_values() {
        assert_eq!(code_of(json!({})), "missing_fields");
        assert_eq!(code_of(json!({"amount": 5000})), "missing_fields");
        assert_eq!(code_of(json!({"currency": "usd"})), "missing_fields");
        assert_eq!(code_of(json!({"amount": null, "currency": "usd"})), "missing_fields");
        assert_eq!(code_of(json!({"amount": 5000, "currency": "  "})), "missing_fields");
        assert_eq!(code_of(json!({"amount": "abc", "currency": 7})), "invalid_amount");
        assert_eq!(code_of(json!([1, 2])), "missing_fields");
    }

    #[test]
    fn rejects_non_positive_or_fractional_amounts() {
        for amount in [json!(0), json!(-5), json!(10.5), json!("5000")] {
            assert_eq!(code_of(json!({"amount": amount, "currency": "usd"})), "invalid_amount");
        }
    }

    #[test]
    fn rejects_non_string_currency() {
        assert_eq!(code_of(json!({"amount": 100, "currency": 840})), "invalid_currency");
    }
}
