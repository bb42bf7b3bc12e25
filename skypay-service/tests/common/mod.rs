#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{body::Body, http::Request, response::Response, Router};
use common_observability::PaymentMetrics;
use skypay_service::{
    app::{build_router, cors_layer, AppState},
    event_store::{Claim, EventRecord, EventStatus, EventStore, MemoryEventStore, StoreError},
    events::WebhookEvent,
    handlers::{EventHandler, HandlerError, HandlerRegistry},
    provider::{PaymentIntent, PaymentIntentRequest, PaymentProvider, ProviderError, StubProvider},
    signature::{signature_header, WebhookVerifier, SIGNATURE_HEADER},
};

pub const SECRET: &str = "whsec_test_secret";

/// Handler that counts invocations and can be told to fail.
pub struct RecordingHandler {
    calls: AtomicUsize,
    fail_next: Mutex<Option<HandlerError>>,
    delay_ms: u64,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), fail_next: Mutex::new(None), delay_ms: 0 })
    }

    pub fn slow(delay_ms: u64) -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), fail_next: Mutex::new(None), delay_ms })
    }

    pub fn fail_once(&self, err: HandlerError) {
        *self.fail_next.lock().unwrap() = Some(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, _event: &WebhookEvent) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        let failure = self.fail_next.lock().unwrap().take();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Provider that records every request it sees.
#[derive(Default)]
pub struct RecordingProvider {
    pub requests: Mutex<Vec<(PaymentIntentRequest, Option<String>)>>,
    pub fail_with: Mutex<Option<String>>,
}

#[async_trait]
impl PaymentProvider for RecordingProvider {
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
        idempotency_key: Option<&str>,
    ) -> Result<PaymentIntent, ProviderError> {
        self.requests.lock().unwrap().push((request.clone(), idempotency_key.map(str::to_string)));
        let failure = self.fail_with.lock().unwrap().clone();
        if let Some(message) = failure {
            return Err(ProviderError::Api { status: 400, message });
        }
        StubProvider::new().create_payment_intent(request, idempotency_key).await
    }
}

/// Memory store whose `claim` and `complete` can be switched to fail like a
/// lost database connection.
pub struct FlakyStore {
    inner: Arc<MemoryEventStore>,
    pub fail_claim: AtomicBool,
    pub fail_complete: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryEventStore>) -> Arc<Self> {
        Arc::new(Self { inner, fail_claim: AtomicBool::new(false), fail_complete: AtomicBool::new(false) })
    }

    fn check(flag: &AtomicBool) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for FlakyStore {
    async fn claim(&self, event: &WebhookEvent) -> Result<Claim, StoreError> {
        Self::check(&self.fail_claim)?;
        self.inner.claim(event).await
    }

    async fn complete(&self, event_id: &str, attempt: i32, status: EventStatus, detail: Option<&str>) -> Result<(), StoreError> {
        Self::check(&self.fail_complete)?;
        self.inner.complete(event_id, attempt, status, detail).await
    }

    async fn release(&self, event_id: &str, attempt: i32, error: &str) -> Result<(), StoreError> {
        self.inner.release(event_id, attempt, error).await
    }

    async fn find(&self, event_id: &str) -> Result<Option<EventRecord>, StoreError> {
        self.inner.find(event_id).await
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryEventStore>,
    pub faults: Arc<FlakyStore>,
    pub handler: Arc<RecordingHandler>,
    pub provider: Arc<RecordingProvider>,
    pub metrics: Arc<PaymentMetrics>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_handler(RecordingHandler::new())
    }

    /// Router whose `payment_intent.succeeded` and `invoice.payment_failed` go to `handler`.
    pub fn with_handler(handler: Arc<RecordingHandler>) -> Self {
        let store = Arc::new(MemoryEventStore::default());
        let faults = FlakyStore::new(store.clone());
        let provider = Arc::new(RecordingProvider::default());
        let metrics = Arc::new(PaymentMetrics::new().unwrap());
        let mut registry = HandlerRegistry::new();
        registry.register("payment_intent.succeeded", handler.clone());
        registry.register("invoice.payment_failed", handler.clone());
        let state = AppState {
            db: None,
            provider: provider.clone(),
            verifier: Arc::new(WebhookVerifier::new(SECRET, 300)),
            events: faults.clone() as Arc<dyn EventStore>,
            handlers: Arc::new(registry),
            metrics: metrics.clone(),
        };
        let router = build_router(state, cors_layer(&["http://localhost:3000"]));
        Self { router, store, faults, handler, provider, metrics }
    }

    pub async fn send(&self, req: Request<Body>) -> Response {
        use tower::ServiceExt;
        self.router.clone().oneshot(req).await.unwrap()
    }
}

pub fn event_body(id: &str, event_type: &str) -> Vec<u8> {
    serde_json::json!({
        "id": id,
        "object": "event",
        "type": event_type,
        "created": 1_700_000_000,
        "livemode": false,
        "data": { "object": { "id": "pi_123", "amount": 5000, "currency": "usd" } }
    })
    .to_string()
    .into_bytes()
}

pub fn signed_webhook(body: &[u8], secret: &str) -> Request<Body> {
    let header = signature_header(secret, chrono::Utc::now().timestamp(), body);
    webhook_request(body, Some(&header))
}

pub fn webhook_request(body: &[u8], signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri("/webhook")
        .method("POST")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(body.to_vec())).unwrap()
}

pub fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(method)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_bytes(resp: Response) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), 1024 * 64).await.unwrap().to_vec()
}

pub async fn body_json(resp: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

pub async fn body_text(resp: Response) -> String {
    String::from_utf8(body_bytes(resp).await).unwrap()
}

/// Shared buffer for formatted log lines.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Subscriber writing plain INFO-and-above lines into this buffer.
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        let writer = self.clone();
        tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish()
    }

    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        let buf = self.0.lock().unwrap();
        String::from_utf8_lossy(&buf).lines().filter(|l| l.contains(needle)).map(str::to_string).collect()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
