//! Configuration for the webhook pipeline

use crate::{Result, RetryPolicy, WebhookError};
use std::time::Duration;

/// Header names stripped from captured events before forwarding.
pub const DEFAULT_REDACTED_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "proxy-authorization",
    "x-api-key",
];

/// Configuration shared by the delivery worker and scheduler
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Timeout for each outbound attempt
    pub timeout: Duration,

    /// User-Agent header for outgoing requests
    pub user_agent: String,

    pub retry_policy: RetryPolicy,

    /// Whether to verify TLS certificates of subscriber endpoints
    pub verify_ssl: bool,

    /// Maximum serialized payload size in bytes
    pub max_payload_size: usize,

    /// Upper bound on simultaneously running deliveries
    pub max_in_flight: usize,

    /// Events waiting for a delivery slot before submissions are dropped
    pub queue_capacity: usize,

    /// How long shutdown waits for in-flight deliveries
    pub shutdown_grace: Duration,

    /// Lowercase header names removed from forwarded payloads
    pub redacted_headers: Vec<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: format!("Stayforge-Webhooks/{}", env!("CARGO_PKG_VERSION")),
            retry_policy: RetryPolicy::default(),
            verify_ssl: true,
            max_payload_size: 1024 * 1024, // 1MB
            max_in_flight: 32,
            queue_capacity: 1024,
            shutdown_grace: Duration::from_secs(10),
            redacted_headers: DEFAULT_REDACTED_HEADERS
                .iter()
                .map(|h| h.to_string())
                .collect(),
        }
    }
}

impl WebhookConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> WebhookConfigBuilder {
        WebhookConfigBuilder::new()
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 {
            return Err(WebhookError::ConfigError(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(WebhookError::ConfigError(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.retry_policy.max_attempts == 0 {
            return Err(WebhookError::ConfigError(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(WebhookError::ConfigError(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `name` is stripped before forwarding (case-insensitive).
    pub fn is_redacted(&self, name: &str) -> bool {
        self.redacted_headers
            .iter()
            .any(|h| h.eq_ignore_ascii_case(name))
    }

    /// Build a configuration from a [`ConfigManager`](stayforge_config::ConfigManager).
    ///
    /// Missing keys keep their defaults. Recognized keys: `timeout_secs`,
    /// `max_attempts`, `initial_delay_ms`, `max_delay_ms`, `max_in_flight`,
    /// `queue_capacity`, `shutdown_grace_secs`, `max_payload_size`,
    /// `user_agent`, `verify_ssl`.
    #[cfg(feature = "config")]
    pub fn from_manager(manager: &stayforge_config::ConfigManager) -> Result<Self> {
        let mut builder = Self::builder();

        if let Some(secs) = manager.get_opt::<u64>("timeout_secs")? {
            builder = builder.timeout_secs(secs);
        }
        if let Some(attempts) = manager.get_opt::<u32>("max_attempts")? {
            builder = builder.max_attempts(attempts);
        }
        if let Some(ms) = manager.get_opt::<u64>("initial_delay_ms")? {
            builder = builder.initial_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = manager.get_opt::<u64>("max_delay_ms")? {
            builder = builder.max_delay(Duration::from_millis(ms));
        }
        if let Some(n) = manager.get_opt::<usize>("max_in_flight")? {
            builder = builder.max_in_flight(n);
        }
        if let Some(n) = manager.get_opt::<usize>("queue_capacity")? {
            builder = builder.queue_capacity(n);
        }
        if let Some(secs) = manager.get_opt::<u64>("shutdown_grace_secs")? {
            builder = builder.shutdown_grace(Duration::from_secs(secs));
        }
        if let Some(size) = manager.get_opt::<usize>("max_payload_size")? {
            builder = builder.max_payload_size(size);
        }
        if let Some(agent) = manager.get_opt::<String>("user_agent")? {
            builder = builder.user_agent(agent);
        }
        if let Some(verify) = manager.get_opt::<bool>("verify_ssl")? {
            builder = builder.verify_ssl(verify);
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }
}

/// Builder for WebhookConfig
#[derive(Debug, Clone, Default)]
pub struct WebhookConfigBuilder {
    config: WebhookConfig,
}

impl WebhookConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: WebhookConfig::default(),
        }
    }

    /// Set the per-attempt timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout = Duration::from_secs(secs);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    /// Total attempts per delivery, first one included
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry_policy.max_attempts = attempts;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.retry_policy.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.retry_policy.max_delay = delay;
        self
    }

    /// Disable retries
    pub fn no_retries(mut self) -> Self {
        self.config.retry_policy = RetryPolicy::none();
        self
    }

    pub fn verify_ssl(mut self, verify: bool) -> Self {
        self.config.verify_ssl = verify;
        self
    }

    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.config.max_payload_size = size;
        self
    }

    pub fn max_in_flight(mut self, n: usize) -> Self {
        self.config.max_in_flight = n;
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.config.queue_capacity = n;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// Replace the redacted header list
    pub fn redacted_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.redacted_headers = names
            .into_iter()
            .map(|n| n.into().to_ascii_lowercase())
            .collect();
        self
    }

    /// Add one header name to the redacted list
    pub fn redact_header(mut self, name: impl Into<String>) -> Self {
        self.config
            .redacted_headers
            .push(name.into().to_ascii_lowercase());
        self
    }

    pub fn build(self) -> WebhookConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WebhookConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.verify_ssl);
        assert_eq!(config.max_payload_size, 1024 * 1024);
        assert_eq!(config.max_in_flight, 32);
        assert_eq!(config.queue_capacity, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = WebhookConfig::builder()
            .timeout_secs(3)
            .max_attempts(7)
            .max_in_flight(4)
            .queue_capacity(16)
            .verify_ssl(false)
            .redact_header("X-Internal-Token")
            .build();

        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.retry_policy.max_attempts, 7);
        assert_eq!(config.max_in_flight, 4);
        assert_eq!(config.queue_capacity, 16);
        assert!(!config.verify_ssl);
        assert!(config.is_redacted("x-internal-token"));
        assert!(config.is_redacted("Authorization"));
        assert!(!config.is_redacted("content-type"));
    }

    #[test]
    fn test_zero_capacities_rejected() {
        let config = WebhookConfig::builder().max_in_flight(0).build();
        assert!(matches!(
            config.validate(),
            Err(WebhookError::ConfigError(_))
        ));

        let config = WebhookConfig::builder().queue_capacity(0).build();
        assert!(config.validate().is_err());

        let config = WebhookConfig::builder().max_attempts(0).build();
        assert!(config.validate().is_err());
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_from_manager() {
        let manager = stayforge_config::ConfigManager::new();
        manager.set("timeout_secs", 2).unwrap();
        manager.set("max_attempts", "3").unwrap();
        manager.set("initial_delay_ms", 50).unwrap();
        manager.set("queue_capacity", 8).unwrap();
        manager.set("user_agent", "hooks/1").unwrap();

        let config = WebhookConfig::from_manager(&manager).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.retry_policy.max_attempts, 3);
        assert_eq!(config.retry_policy.initial_delay, Duration::from_millis(50));
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.max_in_flight, 32);
        assert_eq!(config.user_agent, "hooks/1");
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_from_manager_rejects_zero_in_flight() {
        let manager = stayforge_config::ConfigManager::new();
        manager.set("max_in_flight", 0).unwrap();

        assert!(WebhookConfig::from_manager(&manager).is_err());
    }
}
