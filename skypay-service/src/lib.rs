pub mod app;
pub mod checkout_client;
pub mod config;
pub mod error;
pub mod event_store;
pub mod events;
pub mod handlers;
pub mod intent_handlers;
pub mod probe_handlers;
pub mod provider;
pub mod signature;
pub mod webhook;

pub use app::{build_router, cors_layer, AppState};
