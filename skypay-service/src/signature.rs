//! `Stripe-Signature` verification.
//!
//! The header carries a unix timestamp and one or more `v1` HMAC-SHA256
//! signatures: `t=1700000000,v1=5257a8...,v1=...`. The signed payload is the
//! timestamp, a dot, then the raw request body exactly as received, so the
//! body must never be re-serialized before it gets here.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::events::{EventParseError, WebhookEvent};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("No stripe-signature header value was provided.")]
    MissingHeader,
    #[error("Unable to extract timestamp and signatures from header")]
    MalformedHeader,
    #[error("No signatures found matching the expected signature for payload")]
    Mismatch,
    #[error("Timestamp outside the tolerance zone")]
    OutsideTolerance,
}

impl SignatureError {
    pub fn code(&self) -> &'static str {
        match self {
            SignatureError::MissingHeader => "sig_missing",
            SignatureError::MalformedHeader => "sig_malformed",
            SignatureError::Mismatch => "sig_mismatch",
            SignatureError::OutsideTolerance => "sig_skew",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConstructEventError {
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error("Invalid webhook payload: {0}")]
    Payload(#[from] EventParseError),
}

struct SignatureHeader<'a> {
    timestamp: i64,
    signatures: Vec<&'a str>,
}

fn parse_header(header: &str) -> Result<SignatureHeader<'_>, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match key.trim() {
            "t" => timestamp = value.trim().parse::<i64>().ok(),
            "v1" => signatures.push(value.trim()),
            // v0 and future schemes are ignored
            _ => {}
        }
    }
    match timestamp {
        Some(timestamp) if !signatures.is_empty() => Ok(SignatureHeader { timestamp, signatures }),
        _ => Err(SignatureError::MalformedHeader),
    }
}

fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can be created");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Build a header value the way the provider does. Used by tests and local
/// tooling that needs to replay deliveries.
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    format!("t={},v1={}", timestamp, hex::encode(compute_signature(secret, timestamp, payload)))
}

/// Holds the webhook signing secret and the replay window.
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"<redacted>")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self { secret: secret.into(), tolerance_secs: tolerance_secs.max(1) }
    }

    pub fn tolerance_secs(&self) -> i64 {
        self.tolerance_secs
    }

    /// Check `header` against `payload` at unix time `now`.
    pub fn verify(&self, payload: &[u8], header: Option<&str>, now: i64) -> Result<(), SignatureError> {
        let header = header.map(str::trim).filter(|h| !h.is_empty()).ok_or(SignatureError::MissingHeader)?;
        let parsed = parse_header(header)?;
        let expected = compute_signature(&self.secret, parsed.timestamp, payload);
        let matched = parsed.signatures.iter().any(|candidate| {
            hex::decode(candidate)
                .map(|provided| bool::from(provided.as_slice().ct_eq(expected.as_slice())))
                .unwrap_or(false)
        });
        if !matched {
            return Err(SignatureError::Mismatch);
        }
        if now.abs_diff(parsed.timestamp) > self.tolerance_secs.unsigned_abs() {
            return Err(SignatureError::OutsideTolerance);
        }
        Ok(())
    }

    /// Verify, then parse. JSON is never touched when verification fails.
    pub fn construct_event(&self, payload: &[u8], header: Option<&str>, now: i64) -> Result<WebhookEvent, ConstructEventError> {
        self.verify(payload, header, now)?;
        Ok(WebhookEvent::from_slice(payload)?)
    }
}
