use std::sync::Arc;

use anyhow::Context;
use common_observability::PaymentMetrics;
use reqwest::Client;
use skypay_service::{
    app::{build_router, cors_layer, AppState},
    config::ServiceConfig,
    event_store::PgEventStore,
    handlers::HandlerRegistry,
    provider::StripeClient,
    signature::WebhookVerifier,
};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServiceConfig::from_env()?;
    info!(?config, "Loaded configuration");

    let db = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    let events = PgEventStore::new(db.clone(), config.lease());
    events.ensure_schema().await.context("Failed to create webhook_events table")?;

    let provider = StripeClient::new(Client::new(), config.stripe_api_base.clone(), config.stripe_secret_key.clone());
    let verifier = WebhookVerifier::new(config.stripe_webhook_secret.clone(), config.webhook_tolerance_secs);
    info!(tolerance_secs = verifier.tolerance_secs(), "Webhook signature verifier ready");
    let metrics = PaymentMetrics::new().map_err(|e| anyhow::anyhow!("Failed to register metrics: {e}"))?;
    let handlers = HandlerRegistry::with_defaults();
    info!(event_types = ?handlers.event_types(), "Webhook handlers registered");

    let state = AppState {
        db: Some(db),
        provider: Arc::new(provider),
        verifier: Arc::new(verifier),
        events: Arc::new(events),
        handlers: Arc::new(handlers),
        metrics: Arc::new(metrics),
    };
    let app = build_router(state, cors_layer(&config.allowed_origins));

    let addr = config.listen_addr()?;
    info!(%addr, "starting skypay-service");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
