//! Response-triggered webhooks for Stayforge services
//!
//! Wrap a tower service with [`WebhookLayer`] and every response it produces
//! becomes an [`Event`]. Events are matched against stored
//! [`Subscription`]s by method, path pattern and status, then delivered as
//! signed JSON POSTs in the background with retries. The response the caller
//! sees is never changed and never waits on delivery.
//!
//! # Features
//!
//! - **Interception**: Tower layer that captures status, headers and body
//! - **Subscriptions**: In-memory and JSON file stores with CRUD
//! - **Matching**: `METHOD /path/*` patterns plus status ranges like `500-599`
//! - **Signature Verification**: HMAC-SHA256 signing and verification
//! - **Automatic Retries**: Configurable retry policies with exponential backoff
//! - **Back-pressure**: Bounded queue and a cap on concurrent deliveries
//!
//! # Example: Wiring the layer
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stayforge_webhooks::{
//!     DeliveryScheduler, DeliveryWorker, Dispatcher, InMemorySubscriptionStore,
//!     Subscription, SubscriptionStore, WebhookConfig,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemorySubscriptionStore::new());
//! store
//!     .create(
//!         Subscription::builder("POST /rooms/*", "https://hooks.example.com/rooms")
//!             .status_filter(["200-299"])
//!             .generated_secret()
//!             .build()?,
//!     )
//!     .await?;
//!
//! let worker = DeliveryWorker::new(WebhookConfig::default())?;
//! let scheduler = DeliveryScheduler::start(Dispatcher::new(store, worker))?;
//!
//! // router.layer(scheduler.layer())
//! let _layer = scheduler.layer();
//!
//! scheduler.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Example: Verifying a delivery
//!
//! ```rust
//! use stayforge_webhooks::WebhookSignature;
//!
//! let signer = WebhookSignature::new("whsec_test");
//! let body = br#"{"status":201}"#;
//! let header = signer.sign(body).unwrap();
//!
//! assert!(signer.verify(body, &header, 300).unwrap());
//! ```

mod config;
mod delivery;
mod dispatcher;
mod error;
mod event;
mod interceptor;
pub mod matcher;
mod pattern;
mod payload;
mod retry;
mod scheduler;
mod signature;
mod store;
mod subscription;
mod transport;

#[cfg(test)]
mod testing;

pub use config::{DEFAULT_REDACTED_HEADERS, WebhookConfig, WebhookConfigBuilder};
pub use delivery::DeliveryWorker;
pub use dispatcher::Dispatcher;
pub use error::{BoxError, CaptureError, SubmitError, WebhookError};
pub use event::{Event, EventBuilder, HeaderList};
pub use interceptor::{LOG_TARGET, WebhookBody, WebhookLayer, WebhookService};
pub use pattern::{MethodRule, PathPattern, Pattern, StatusFilter, StatusRange};
pub use payload::{BodyEncoding, DeliveryAttempt, DeliveryOutcome, DeliveryPayload};
pub use retry::RetryPolicy;
pub use scheduler::{DeliveryScheduler, SchedulerHandle, SchedulerStats};
pub use signature::{WebhookSignature, headers};
pub use store::{
    InMemorySubscriptionStore, JsonFileSubscriptionStore, SUBSCRIPTIONS_FILE, SubscriptionStore,
};
pub use subscription::{
    REDACTED_SECRET, Subscription, SubscriptionBuilder, SubscriptionUpdate, generate_secret,
};
pub use transport::{OutboundRequest, ReqwestTransport, Transport, TransportResponse};

/// Result type for webhook operations
pub type Result<T> = std::result::Result<T, WebhookError>;
