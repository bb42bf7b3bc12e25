use anyhow::{Context, Result};
use std::{env, net::SocketAddr, time::Duration};

use crate::event_store::DEFAULT_LEASE_SECS;
use crate::provider::DEFAULT_API_BASE;
use crate::signature::DEFAULT_TOLERANCE_SECS;

pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:3001",
    "http://localhost:5173",
];

#[derive(Clone)]
pub struct ServiceConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,
    pub webhook_tolerance_secs: i64,
    pub webhook_lease_secs: u64,
    pub allowed_origins: Vec<String>,
    pub host: String,
    pub port: u16,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("database_url", &"<redacted>")
            .field("database_max_connections", &self.database_max_connections)
            .field("stripe_secret_key", &"<redacted>")
            .field("stripe_webhook_secret", &"<redacted>")
            .field("stripe_api_base", &self.stripe_api_base)
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .field("webhook_lease_secs", &self.webhook_lease_secs)
            .field("allowed_origins", &self.allowed_origins)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{key} must be set"))
        };
        let database_url = required("DATABASE_URL")?;
        let stripe_secret_key = required("STRIPE_SECRET_KEY")?;
        let stripe_webhook_secret = required("STRIPE_WEBHOOK_SECRET")?;

        let database_max_connections = lookup("DATABASE_MAX_CONNECTIONS")
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(5);
        let stripe_api_base = lookup("STRIPE_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let webhook_tolerance_secs = lookup("WEBHOOK_TOLERANCE_SECS")
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(DEFAULT_TOLERANCE_SECS);
        let webhook_lease_secs = lookup("WEBHOOK_LEASE_SECS")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_LEASE_SECS);
        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect());
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = match lookup("PORT") {
            Some(raw) => raw.parse::<u16>().with_context(|| format!("PORT is not a valid port: {raw}"))?,
            None => 5000,
        };

        Ok(Self {
            database_url,
            database_max_connections: database_max_connections.max(1),
            stripe_secret_key,
            stripe_webhook_secret,
            stripe_api_base,
            webhook_tolerance_secs: webhook_tolerance_secs.max(1),
            webhook_lease_secs: webhook_lease_secs.max(5),
            allowed_origins,
            host,
            port,
        })
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip = self.host.parse().with_context(|| format!("HOST is not an IP address: {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.webhook_lease_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("DATABASE_URL", "postgres://localhost/skypay"),
        ("STRIPE_SECRET_KEY", "sk_test_1"),
        ("STRIPE_WEBHOOK_SECRET", "whsec_1"),
    ];

    #[test]
    fn defaults_apply() {
        let cfg = ServiceConfig::from_lookup(lookup(REQUIRED)).unwrap();
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.database_max_connections, 5);
        assert_eq!(cfg.webhook_tolerance_secs, 300);
        assert_eq!(cfg.webhook_lease_secs, 60);
        assert_eq!(cfg.stripe_api_base, "https://api.stripe.com");
        assert_eq!(cfg.allowed_origins.len(), DEFAULT_ALLOWED_ORIGINS.len());
        assert_eq!(cfg.listen_addr().unwrap().to_string(), "0.0.0.0:5000");
    }

    #[test]
    fn missing_secret_is_an_error() {
        let err = ServiceConfig::from_lookup(lookup(&REQUIRED[..2])).unwrap_err();
        assert!(err.to_string().contains("STRIPE_WEBHOOK_SECRET"));
    }

    #[test]
    fn overrides_are_clamped() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("WEBHOOK_LEASE_SECS", "1"),
            ("WEBHOOK_TOLERANCE_SECS", "0"),
            ("DATABASE_MAX_CONNECTIONS", "0"),
            ("ALLOWED_ORIGINS", "https://shop.example.com, https://admin.example.com"),
            ("PORT", "8080"),
        ]);
        let cfg = ServiceConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.webhook_lease_secs, 5);
        assert_eq!(cfg.webhook_tolerance_secs, 1);
        assert_eq!(cfg.database_max_connections, 1);
        assert_eq!(cfg.allowed_origins, vec!["https://shop.example.com", "https://admin.example.com"]);
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    fn bad_port_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PORT", "http"));
        assert!(ServiceConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let cfg = ServiceConfig::from_lookup(lookup(REQUIRED)).unwrap();
        let out = format!("{cfg:?}");
        assert!(!out.contains("sk_test_1"));
        assert!(!out.contains("whsec_1"));
    }
}
