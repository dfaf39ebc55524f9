// Stayforge - webhook notifications for the Stayforge resource-management API
//
// Responses leaving the API are captured by a tower layer, matched against
// subscriptions and delivered to subscriber URLs in the background.

// Re-export core functionality
pub use stayforge_webhooks::*;

// Re-export optional crates
#[cfg(feature = "config")]
pub use stayforge_config;

#[cfg(feature = "log")]
pub use stayforge_log;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        DeliveryOutcome, DeliveryScheduler, DeliveryWorker, Dispatcher, Event,
        InMemorySubscriptionStore, JsonFileSubscriptionStore, RetryPolicy, Subscription,
        SubscriptionStore, SubscriptionUpdate, WebhookConfig, WebhookError, WebhookLayer,
        WebhookSignature,
    };

    #[cfg(feature = "config")]
    pub use stayforge_config::ConfigManager;

    #[cfg(feature = "log")]
    pub use stayforge_log::{LogConfig, LogFormat, LogLevel};
}
