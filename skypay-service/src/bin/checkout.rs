//! Command-line stand-in for the storefront payment form: creates an intent
//! through the backend, confirms it with a tokenized test card and prints
//! what the buyer would see.

use anyhow::Context;
use skypay_service::checkout_client::{CheckoutClient, CheckoutStatus, TokenizedCard};
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")))
        .init();

    let backend = env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:5000".to_string());
    let publishable_key = env::var("STRIPE_PUBLISHABLE_KEY").context("STRIPE_PUBLISHABLE_KEY must be set")?;
    let amount: i64 = env::var("CHECKOUT_AMOUNT")
        .unwrap_or_else(|_| "5000".to_string())
        .parse()
        .context("CHECKOUT_AMOUNT must be an integer amount in minor units")?;
    let currency = env::var("CHECKOUT_CURRENCY").unwrap_or_else(|_| "usd".to_string());
    let payment_method = env::var("CHECKOUT_PAYMENT_METHOD").unwrap_or_else(|_| "pm_card_visa".to_string());

    let mut client = CheckoutClient::new(reqwest::Client::new(), backend, publishable_key);
    if let Ok(provider_url) = env::var("STRIPE_API_BASE") {
        client = client.with_provider_url(provider_url);
    }

    println!("Processing...");
    let status = client.pay(amount, &currency, &TokenizedCard::new(payment_method)).await;
    println!("{}", status.message());
    if status != CheckoutStatus::Succeeded {
        std::process::exit(1);
    }
    Ok(())
}
