use std::sync::Arc;

use axum::{
    extract::{FromRef, Request, State},
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, StatusCode,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use common_http_errors::{ApiError, ERROR_CODE_HEADER};
use common_observability::PaymentMetrics;
use sqlx::PgPool;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::error;

use crate::event_store::EventStore;
use crate::handlers::HandlerRegistry;
use crate::intent_handlers::create_payment_intent;
use crate::probe_handlers::{healthz, root, test_db};
use crate::provider::PaymentProvider;
use crate::signature::WebhookVerifier;
use crate::webhook::handle_webhook;

pub const SERVICE_NAME: &str = "skypay-service";

#[derive(Clone)]
pub struct AppState {
    /// `None` in tests and database-less runs; `/test-db` then reports unavailable.
    pub db: Option<PgPool>,
    pub provider: Arc<dyn PaymentProvider>,
    pub verifier: Arc<WebhookVerifier>,
    pub events: Arc<dyn EventStore>,
    pub handlers: Arc<HandlerRegistry>,
    pub metrics: Arc<PaymentMetrics>,
}

impl FromRef<AppState> for Arc<PaymentMetrics> {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}

pub async fn http_error_metrics(State(metrics): State<Arc<PaymentMetrics>>, req: Request, next: Next) -> Response {
    let resp = next.run(req).await;
    let status = resp.status();
    if status.as_u16() >= 400 {
        let code = resp
            .headers()
            .get(ERROR_CODE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");
        metrics.record_http_error(SERVICE_NAME, code, status.as_str());
    }
    resp
}

pub async fn metrics(State(metrics): State<Arc<PaymentMetrics>>) -> Response {
    match metrics.render() {
        Ok(body) => (StatusCode::OK, [(CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(err) => {
            error!(error = %err, "Failed to encode metrics");
            ApiError::internal("metrics_unavailable", "Failed to encode metrics", None).into_response()
        }
    }
}

async fn not_found() -> ApiError {
    ApiError::NotFound { code: "not_found", trace_id: None }
}

pub fn cors_layer<S: AsRef<str>>(allowed_origins: &[S]) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|origin| origin.as_ref().parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        ))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            HeaderName::from_static("stripe-signature"),
            HeaderName::from_static("idempotency-key"),
        ])
}

pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    let metrics = state.metrics.clone();
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/test-db", get(test_db))
        .route("/create-payment-intent", post(create_payment_intent))
        .route("/webhook", post(handle_webhook))
        .route("/metrics", get(self::metrics))
        .fallback(not_found)
        .with_state(state)
        .layer(cors)
        .layer(middleware::from_fn_with_state(metrics, http_error_metrics))
}
