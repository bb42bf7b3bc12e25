use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Prometheus counters for the payment API. Each instance owns its own
/// registry so tests can build isolated copies.
#[derive(Clone)]
pub struct PaymentMetrics {
    pub registry: Registry,
    pub webhook_events_total: IntCounterVec,
    pub webhook_signature_failures_total: IntCounterVec,
    pub payment_intents_total: IntCounterVec,
    pub http_errors_total: IntCounterVec,
}

impl PaymentMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let webhook_events_total = IntCounterVec::new(
            Opts::new("webhook_events_total", "Verified webhook deliveries grouped by ingestion outcome"),
            &["outcome"],
        )?;
        let webhook_signature_failures_total = IntCounterVec::new(
            Opts::new("webhook_signature_failures_total", "Webhook deliveries rejected before dispatch"),
            &["reason"],
        )?;
        let payment_intents_total = IntCounterVec::new(
            Opts::new("payment_intents_total", "Payment intent creation attempts grouped by result"),
            &["result"],
        )?;
        let http_errors_total = IntCounterVec::new(
            Opts::new("http_errors_total", "Count of HTTP error responses emitted (status >= 400)"),
            &["service", "code", "status"],
        )?;
        registry.register(Box::new(webhook_events_total.clone()))?;
        registry.register(Box::new(webhook_signature_failures_total.clone()))?;
        registry.register(Box::new(payment_intents_total.clone()))?;
        registry.register(Box::new(http_errors_total.clone()))?;
        Ok(Self {
            registry,
            webhook_events_total,
            webhook_signature_failures_total,
            payment_intents_total,
            http_errors_total,
        })
    }

    pub fn record_webhook_outcome(&self, outcome: &str) {
        self.webhook_events_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_signature_failure(&self, reason: &str) {
        self.webhook_signature_failures_total.with_label_values(&[reason]).inc();
    }

    pub fn record_payment_intent(&self, result: &str) {
        self.payment_intents_total.with_label_values(&[result]).inc();
    }

    pub fn record_http_error(&self, service: &str, code: &str, status: &str) {
        self.http_errors_total.with_label_values(&[service, code, status]).inc();
    }

    pub fn webhook_outcome_count(&self, outcome: &str) -> u64 {
        self.webhook_events_total.with_label_values(&[outcome]).get()
    }

    /// Text exposition of every registered family.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
