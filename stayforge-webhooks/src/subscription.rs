//! Webhook subscriptions

use crate::pattern::{Pattern, StatusFilter};
use crate::{Event, Result, WebhookError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use url::Url;
use uuid::Uuid;

/// Placeholder shown instead of a secret in management listings
pub const REDACTED_SECRET: &str = "[redacted]";

/// A persisted rule plus the endpoint that wants matching traffic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    id: String,

    /// Method and path rule
    pub pattern: Pattern,

    /// Status codes that qualify; `None` means any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_filter: Option<StatusFilter>,

    pub target_url: Url,

    /// HMAC key; deliveries go unsigned without one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Extra headers sent with every delivery
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Enabled, unsigned subscription with a fresh id
    pub fn new(pattern: Pattern, target_url: Url) -> Result<Self> {
        validate_target(&target_url)?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            pattern,
            status_filter: None,
            target_url,
            secret: None,
            enabled: true,
            description: None,
            headers: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Builder taking the textual forms, e.g. `"POST /rooms/*"`
    pub fn builder(pattern: impl Into<String>, target_url: impl Into<String>) -> SubscriptionBuilder {
        SubscriptionBuilder::new(pattern, target_url)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Whether the rule and status filter accept `event`.
    ///
    /// Ignores `enabled`; the matcher filters on that.
    pub fn accepts(&self, event: &Event) -> bool {
        self.pattern.matches(event.method(), event.path())
            && self
                .status_filter
                .as_ref()
                .is_none_or(|f| f.matches(event.status()))
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.touch();
    }

    /// Apply a partial update. `id` and `created_at` never change.
    pub fn apply(&mut self, update: SubscriptionUpdate) -> Result<()> {
        if let Some(url) = &update.target_url {
            validate_target(url)?;
        }
        if let Some(headers) = &update.headers {
            validate_headers(headers)?;
        }

        if let Some(pattern) = update.pattern {
            self.pattern = pattern;
        }
        if let Some(filter) = update.status_filter {
            self.status_filter = filter;
        }
        if let Some(url) = update.target_url {
            self.target_url = url;
        }
        if let Some(secret) = update.secret {
            self.secret = secret;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(headers) = update.headers {
            self.headers = headers;
        }
        self.touch();
        Ok(())
    }

    /// Replace the secret with a fresh random one and return it
    pub fn rotate_secret(&mut self) -> String {
        let secret = generate_secret();
        self.secret = Some(secret.clone());
        self.touch();
        secret
    }

    /// Copy safe to hand to management callers
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.secret.is_some() {
            copy.secret = Some(REDACTED_SECRET.to_string());
        }
        copy
    }

    fn touch(&mut self) {
        // Keep updated_at monotonic even if the clock is coarse
        self.updated_at = Utc::now().max(self.updated_at);
    }
}

/// Partial update for a [`Subscription`].
///
/// Outer `None` leaves a field alone; `Some(None)` clears an optional one.
/// In JSON a missing key leaves the field alone and `null` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionUpdate {
    #[serde(default)]
    pub pattern: Option<Pattern>,
    #[serde(default, deserialize_with = "present")]
    pub status_filter: Option<Option<StatusFilter>>,
    #[serde(default)]
    pub target_url: Option<Url>,
    #[serde(default, deserialize_with = "present")]
    pub secret: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
}

/// A key that is present, `null` included, becomes `Some`
fn present<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl SubscriptionUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pattern(mut self, pattern: &str) -> Result<Self> {
        self.pattern = Some(pattern.parse()?);
        Ok(self)
    }

    pub fn status_filter(mut self, filter: Option<StatusFilter>) -> Self {
        self.status_filter = Some(filter);
        self
    }

    pub fn target_url(mut self, url: &str) -> Result<Self> {
        self.target_url = Some(Url::parse(url)?);
        Ok(self)
    }

    pub fn secret(mut self, secret: Option<String>) -> Self {
        self.secret = Some(secret);
        self
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// Builder for [`Subscription`]; parsing happens in [`build`](Self::build)
#[derive(Debug, Clone)]
pub struct SubscriptionBuilder {
    id: Option<String>,
    pattern: String,
    target_url: String,
    status_filter: Option<Vec<String>>,
    secret: Option<String>,
    enabled: bool,
    description: Option<String>,
    headers: BTreeMap<String, String>,
}

impl SubscriptionBuilder {
    pub fn new(pattern: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self {
            id: None,
            pattern: pattern.into(),
            target_url: target_url.into(),
            status_filter: None,
            secret: None,
            enabled: true,
            description: None,
            headers: BTreeMap::new(),
        }
    }

    /// Use a caller-chosen id instead of a generated one
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Status entries such as `"404"` or `"500-599"`
    pub fn status_filter<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.status_filter = Some(entries.into_iter().map(Into::into).collect());
        self
    }

    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Sign with a freshly generated secret
    pub fn generated_secret(mut self) -> Self {
        self.secret = Some(generate_secret());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<Subscription> {
        let pattern: Pattern = self.pattern.parse()?;
        let target_url = Url::parse(&self.target_url)?;
        let status_filter = self.status_filter.map(StatusFilter::parse).transpose()?;
        validate_headers(&self.headers)?;

        let mut subscription = Subscription::new(pattern, target_url)?;
        if let Some(id) = self.id {
            if id.trim().is_empty() {
                return Err(WebhookError::Internal(
                    "subscription id must not be empty".to_string(),
                ));
            }
            subscription.id = id;
        }
        subscription.status_filter = status_filter;
        subscription.secret = self.secret;
        subscription.enabled = self.enabled;
        subscription.description = self.description;
        subscription.headers = self.headers;
        Ok(subscription)
    }
}

fn validate_target(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(WebhookError::UnsupportedScheme(other.to_string())),
    }
}

fn validate_headers(headers: &BTreeMap<String, String>) -> Result<()> {
    for (name, value) in headers {
        http::HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| WebhookError::ConfigError(format!("invalid header name: {name:?}")))?;
        http::HeaderValue::from_str(value).map_err(|_| {
            WebhookError::ConfigError(format!("invalid value for header {name:?}"))
        })?;
    }
    Ok(())
}

/// Random signing secret, `whsec_` followed by 64 hex characters
pub fn generate_secret() -> String {
    let bytes: [u8; 32] = rand::random();
    format!("whsec_{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(method: &str, path: &str, status: u16) -> Event {
        Event::builder(method, path).status(status).build().unwrap()
    }

    #[test]
    fn test_subscription_builder() {
        let sub = Subscription::builder("POST /rooms/*", "https://example.test/hook")
            .secret("custom-secret")
            .status_filter(["200-299"])
            .description("room creation")
            .header("X-Custom", "value")
            .build()
            .unwrap();

        assert!(!sub.id().is_empty());
        assert_eq!(sub.secret.as_deref(), Some("custom-secret"));
        assert_eq!(sub.description.as_deref(), Some("room creation"));
        assert_eq!(sub.headers.get("X-Custom"), Some(&"value".to_string()));
        assert!(sub.enabled);
        assert_eq!(sub.created_at(), sub.updated_at());
    }

    #[test]
    fn test_builder_rejects_bad_input() {
        assert!(matches!(
            Subscription::builder("POST rooms", "https://example.test").build(),
            Err(WebhookError::InvalidPattern(_))
        ));
        assert!(matches!(
            Subscription::builder("/**", "not a url").build(),
            Err(WebhookError::InvalidUrl(_))
        ));
        assert!(matches!(
            Subscription::builder("/**", "ftp://example.test").build(),
            Err(WebhookError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            Subscription::builder("/**", "https://example.test")
                .status_filter(["700"])
                .build(),
            Err(WebhookError::InvalidStatusFilter(_))
        ));
        assert!(
            Subscription::builder("/**", "https://example.test")
                .header("bad header", "v")
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_accepts() {
        let sub = Subscription::builder("POST /rooms/*", "https://example.test/hook")
            .build()
            .unwrap();

        assert!(sub.accepts(&event("POST", "/rooms/abc123", 201)));
        assert!(sub.accepts(&event("post", "/rooms/abc123", 500)));
        assert!(!sub.accepts(&event("GET", "/rooms/abc123", 200)));
        assert!(!sub.accepts(&event("POST", "/rooms/abc123/keys", 201)));
    }

    #[test]
    fn test_accepts_with_status_filter() {
        let sub = Subscription::builder("* /**", "https://example.test/hook")
            .status_filter(["500-599"])
            .build()
            .unwrap();

        assert!(!sub.accepts(&event("GET", "/rooms", 404)));
        assert!(sub.accepts(&event("GET", "/rooms", 503)));
    }

    #[test]
    fn test_apply_update_keeps_identity() {
        let mut sub = Subscription::builder("GET /rooms", "https://example.test/a")
            .id("sub-1")
            .secret("s1")
            .build()
            .unwrap();
        let created = sub.created_at();

        let update = SubscriptionUpdate::new()
            .pattern("DELETE /rooms/*")
            .unwrap()
            .target_url("https://example.test/b")
            .unwrap()
            .secret(None)
            .status_filter(Some(StatusFilter::parse(["204"]).unwrap()));
        sub.apply(update).unwrap();

        assert_eq!(sub.id(), "sub-1");
        assert_eq!(sub.created_at(), created);
        assert!(sub.updated_at() >= created);
        assert_eq!(sub.pattern.to_string(), "DELETE /rooms/*");
        assert_eq!(sub.target_url.as_str(), "https://example.test/b");
        assert_eq!(sub.secret, None);
        assert!(sub.status_filter.is_some());
    }

    #[test]
    fn test_apply_rejects_unsupported_scheme() {
        let mut sub = Subscription::builder("/**", "https://example.test/a")
            .build()
            .unwrap();
        let update = SubscriptionUpdate::new()
            .target_url("mailto:ops@example.test")
            .unwrap();

        assert!(sub.apply(update).is_err());
        assert_eq!(sub.target_url.as_str(), "https://example.test/a");
    }

    #[test]
    fn test_redacted_hides_secret() {
        let sub = Subscription::builder("/**", "https://example.test")
            .generated_secret()
            .build()
            .unwrap();

        assert!(sub.secret.as_deref().unwrap().starts_with("whsec_"));
        assert_eq!(sub.redacted().secret.as_deref(), Some(REDACTED_SECRET));

        let unsigned = Subscription::builder("/**", "https://example.test")
            .build()
            .unwrap();
        assert_eq!(unsigned.redacted().secret, None);
    }

    #[test]
    fn test_secret_rotation() {
        let mut sub = Subscription::builder("/**", "https://example.test")
            .generated_secret()
            .build()
            .unwrap();
        let old = sub.secret.clone().unwrap();

        let new = sub.rotate_secret();
        assert_ne!(old, new);
        assert_eq!(sub.secret.as_deref(), Some(new.as_str()));
        assert_eq!(new.len(), "whsec_".len() + 64);
    }

    #[test]
    fn test_serde_roundtrip_preserves_id() {
        let sub = Subscription::builder("POST /rooms/*", "https://example.test/hook")
            .status_filter(["404", "500-599"])
            .secret("s")
            .build()
            .unwrap();

        let json = serde_json::to_string(&sub).unwrap();
        let back: Subscription = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sub);
    }

    #[test]
    fn test_json_patch_null_clears_and_missing_keeps() {
        let mut sub = Subscription::builder("/rooms/*", "https://example.test/hook")
            .status_filter(["500-599"])
            .secret("whsec_x")
            .description("ops")
            .build()
            .unwrap();

        let patch: SubscriptionUpdate =
            serde_json::from_str(r#"{"secret": null, "status_filter": null}"#).unwrap();
        assert_eq!(patch.secret, Some(None));
        assert!(matches!(patch.status_filter, Some(None)));
        assert_eq!(patch.description, None);

        sub.apply(patch).unwrap();
        assert_eq!(sub.secret, None);
        assert_eq!(sub.status_filter, None);
        assert_eq!(sub.description.as_deref(), Some("ops"));

        let patch: SubscriptionUpdate =
            serde_json::from_str(r#"{"secret": "whsec_y", "description": null}"#).unwrap();
        sub.apply(patch).unwrap();
        assert_eq!(sub.secret.as_deref(), Some("whsec_y"));
        assert_eq!(sub.description, None);
    }
}
