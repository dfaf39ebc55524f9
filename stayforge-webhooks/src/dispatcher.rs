//! Turning an event into deliveries

use crate::matcher;
use crate::payload::DeliveryAttempt;
use crate::store::SubscriptionStore;
use crate::{DeliveryWorker, Event, Subscription};
use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Reads subscriptions, runs the matcher and hands pairs to the worker
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn SubscriptionStore>,
    worker: DeliveryWorker,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(store: Arc<dyn SubscriptionStore>, worker: DeliveryWorker) -> Self {
        Self { store, worker }
    }

    pub fn worker(&self) -> &DeliveryWorker {
        &self.worker
    }

    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    /// Subscriptions that should receive `event`, in store order.
    ///
    /// A store read failure is logged and yields no matches.
    pub async fn resolve(&self, event: &Event) -> Vec<Subscription> {
        let subscriptions = match self.store.list_enabled().await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                warn!(
                    event_id = %event.id(),
                    method = %event.method(),
                    path = %event.path(),
                    error = %e,
                    "Subscription lookup failed, skipping event"
                );
                return Vec::new();
            }
        };

        let matched = matcher::select_owned(event, subscriptions);
        debug!(
            event_id = %event.id(),
            method = %event.method(),
            path = %event.path(),
            status = event.status(),
            matched = matched.len(),
            "Matched subscriptions"
        );
        matched
    }

    /// Deliver `event` to every match at once, without any concurrency
    /// bound. One slow subscriber doesn't hold up the others.
    pub async fn dispatch(&self, event: &Event, cancel: &CancellationToken) -> Vec<DeliveryAttempt> {
        let matched = self.resolve(event).await;
        join_all(
            matched
                .iter()
                .map(|subscription| self.worker.deliver(event, subscription, cancel)),
        )
        .await
    }
}
