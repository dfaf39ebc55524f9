//! Error types for webhook operations

use thiserror::Error;

/// Boxed error used for response bodies flowing through the interceptor.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur during webhook operations
#[derive(Error, Debug)]
pub enum WebhookError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Target URL uses something other than http/https
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// Signature verification failed
    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    /// Empty signature header
    #[error("Signature header missing")]
    SignatureMissing,

    /// Timestamp validation failed
    #[error("Timestamp validation failed: {0}")]
    TimestampInvalid(String),

    /// Payload serialization failed
    #[error("Payload error: {0}")]
    PayloadError(String),

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Subscription already exists: {0}")]
    DuplicateSubscription(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid status filter: {0}")]
    InvalidStatusFilter(String),

    /// Subscription store could not be read or written
    #[error("Subscription store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Outbound attempt exceeded its timeout
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        WebhookError::PayloadError(err.to_string())
    }
}

#[cfg(feature = "config")]
impl From<stayforge_config::ConfigError> for WebhookError {
    fn from(err: stayforge_config::ConfigError) -> Self {
        WebhookError::ConfigError(err.to_string())
    }
}

/// Failure to turn an intercepted exchange into an event.
///
/// Never leaves the interceptor: the caller still gets its response and
/// no notification fires.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("response body stream failed: {0}")]
    Body(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),
}

/// Rejection of an event at submission time.
///
/// Distinct from a delivery failure: nothing was attempted.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("delivery queue is full")]
    QueueFull,

    #[error("delivery scheduler is shut down")]
    Closed,
}
