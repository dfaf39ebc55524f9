//! Delivery payloads and per-delivery records

use crate::event::{Event, HeaderList};
use crate::{Subscription, WebhookConfig};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// How the response body appears in [`DeliveryPayload::body`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    /// Parsed JSON value
    Json,
    /// UTF-8 string
    Text,
    /// Base64 string of raw bytes
    Base64,
    /// No body; `body` is null
    Empty,
}

/// JSON document POSTed to a subscriber
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryPayload {
    /// Delivery id, same for every retry
    pub id: Uuid,
    pub event_id: Uuid,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub request_headers: HeaderList,
    pub response_headers: HeaderList,
    pub body: serde_json::Value,
    pub body_encoding: BodyEncoding,
    pub observed_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl DeliveryPayload {
    /// Build the payload for one delivery, dropping redacted headers
    pub fn from_event(delivery_id: Uuid, event: &Event, config: &WebhookConfig) -> Self {
        let (body, body_encoding) = encode_body(event.response_body());
        Self {
            id: delivery_id,
            event_id: event.id(),
            method: event.method().to_string(),
            path: event.path().to_string(),
            status: event.status(),
            request_headers: event.request_headers().without(|n| config.is_redacted(n)),
            response_headers: event.response_headers().without(|n| config.is_redacted(n)),
            body,
            body_encoding,
            observed_at: event.observed_at(),
            elapsed_ms: event.elapsed_ms(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

fn encode_body(bytes: &[u8]) -> (serde_json::Value, BodyEncoding) {
    if bytes.is_empty() {
        return (serde_json::Value::Null, BodyEncoding::Empty);
    }
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(bytes) {
        return (value, BodyEncoding::Json);
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => (serde_json::Value::String(text.to_string()), BodyEncoding::Text),
        Err(_) => (
            serde_json::Value::String(BASE64.encode(bytes)),
            BodyEncoding::Base64,
        ),
    }
}

/// State of one (event, subscription) delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// No attempt made yet
    Pending,

    /// Last attempt failed, another will follow
    Retrying,

    Succeeded,

    /// Gave up: attempts exhausted or payload rejected before sending
    Failed,

    /// Cut short by shutdown
    Abandoned,
}

impl DeliveryOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Abandoned)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Running record of a delivery and its retries. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub event_id: Uuid,
    pub subscription_id: String,
    pub target_url: String,
    pub outcome: DeliveryOutcome,

    /// Outbound calls made so far
    pub attempts: u32,

    /// HTTP status of the last response, if any arrived
    pub last_status: Option<u16>,

    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DeliveryAttempt {
    pub fn new(event: &Event, subscription: &Subscription) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id: event.id(),
            subscription_id: subscription.id().to_string(),
            target_url: subscription.target_url.to_string(),
            outcome: DeliveryOutcome::Pending,
            attempts: 0,
            last_status: None,
            last_error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn mark_succeeded(&mut self, status: u16) {
        self.attempts += 1;
        self.last_status = Some(status);
        self.last_error = None;
        self.finish(DeliveryOutcome::Succeeded);
    }

    /// Record a failed call. `will_retry` decides between
    /// [`Retrying`](DeliveryOutcome::Retrying) and
    /// [`Failed`](DeliveryOutcome::Failed).
    pub fn mark_failed(&mut self, error: impl Into<String>, status: Option<u16>, will_retry: bool) {
        self.attempts += 1;
        self.last_status = status;
        self.last_error = Some(truncate_string(&error.into(), 1024));
        if will_retry {
            self.outcome = DeliveryOutcome::Retrying;
        } else {
            self.finish(DeliveryOutcome::Failed);
        }
    }

    /// Terminal failure without any outbound call
    pub fn mark_rejected(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        self.finish(DeliveryOutcome::Failed);
    }

    pub fn mark_abandoned(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
        self.finish(DeliveryOutcome::Abandoned);
    }

    fn finish(&mut self, outcome: DeliveryOutcome) {
        self.outcome = outcome;
        self.finished_at = Some(Utc::now());
    }
}

/// Cut `s` to at most `max_len` bytes on a char boundary
pub(crate) fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len.saturating_sub(3);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
