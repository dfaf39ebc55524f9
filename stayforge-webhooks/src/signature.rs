//! HMAC-SHA256 payload signing
//!
//! The header value has the form `t=<unix seconds>,v1=<hex digest>` where the
//! digest covers `"<t>.<body>"`.

use crate::{Result, WebhookError};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs outbound payloads and verifies them on the receiving side
#[derive(Clone)]
pub struct WebhookSignature {
    secret: String,
}

impl std::fmt::Debug for WebhookSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSignature")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl WebhookSignature {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Signature header value for `payload`, stamped with the current time
    pub fn sign(&self, payload: &[u8]) -> Result<String> {
        self.sign_with_timestamp(payload, chrono::Utc::now().timestamp())
    }

    pub fn sign_with_timestamp(&self, payload: &[u8], timestamp: i64) -> Result<String> {
        let digest = self.digest(timestamp, payload)?;
        Ok(format!("t={},v1={}", timestamp, digest))
    }

    /// Check a signature header against `payload`.
    ///
    /// Returns `Ok(false)` for a well-formed header whose digest doesn't
    /// match, and an error for an empty, malformed or stale one.
    pub fn verify(&self, payload: &[u8], signature: &str, tolerance_secs: u64) -> Result<bool> {
        let parts = parse_signature(signature)?;

        let age = (chrono::Utc::now().timestamp() - parts.timestamp).unsigned_abs();
        if age > tolerance_secs {
            return Err(WebhookError::TimestampInvalid(format!(
                "Timestamp outside tolerance: {} seconds (tolerance: {} seconds)",
                age, tolerance_secs
            )));
        }

        let expected = self.digest(parts.timestamp, payload)?;
        Ok(constant_time_compare(&parts.signature, &expected))
    }

    fn digest(&self, timestamp: i64, payload: &[u8]) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| WebhookError::Internal(e.to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

struct SignatureParts {
    timestamp: i64,
    signature: String,
}

fn parse_signature(signature: &str) -> Result<SignatureParts> {
    if signature.trim().is_empty() {
        return Err(WebhookError::SignatureMissing);
    }

    let mut timestamp = None;
    let mut digest = None;

    for part in signature.split(',') {
        match part.trim().split_once('=') {
            Some(("t", t)) => timestamp = Some(t),
            Some(("v1", v)) => digest = Some(v),
            _ => {}
        }
    }

    match (timestamp, digest) {
        (Some(t), Some(v)) => {
            let timestamp = t
                .parse()
                .map_err(|_| WebhookError::TimestampInvalid(format!("not a unix time: {t}")))?;
            Ok(SignatureParts {
                timestamp,
                signature: v.to_string(),
            })
        }
        _ => Err(WebhookError::SignatureInvalid(
            "Missing timestamp or signature".to_string(),
        )),
    }
}

/// Constant-time string comparison
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Header names attached to outbound deliveries
pub mod headers {
    use http::HeaderName;

    /// `t=<unix>,v1=<hex>`
    pub const SIGNATURE: HeaderName = HeaderName::from_static("x-webhook-signature");

    /// Delivery id, constant across retries of one delivery
    pub const WEBHOOK_ID: HeaderName = HeaderName::from_static("x-webhook-id");

    /// `"<METHOD> <path>"` of the intercepted request
    pub const EVENT: HeaderName = HeaderName::from_static("x-webhook-event");

    /// 1-based attempt number
    pub const ATTEMPT: HeaderName = HeaderName::from_static("x-webhook-attempt");
}
