//! Bounded delivery scheduling
//!
//! Events enter a bounded queue through [`SchedulerHandle::submit`], which
//! never waits: a full queue drops the event and says so. One background
//! loop takes events in order, resolves their subscriptions and starts a
//! delivery task per match once a concurrency slot is free. A delivery
//! holds its slot through all of its retries.

use crate::interceptor::WebhookLayer;
use crate::payload::{DeliveryAttempt, DeliveryOutcome};
use crate::{Dispatcher, Event, Result, SubmitError};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Counters for one scheduler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Events accepted into the queue
    pub submitted: u64,
    /// Events turned away: queue full, or still queued at shutdown
    pub dropped: u64,
    /// Deliveries currently holding a slot
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub delivered: u64,
    /// Deliveries that ran out of attempts or were rejected before sending
    pub failed: u64,
    /// Deliveries cut short by shutdown
    pub abandoned: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    delivered: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.submitted.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
            delivered: self.delivered.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            abandoned: self.abandoned.load(Ordering::SeqCst),
        }
    }

    fn record(&self, outcome: DeliveryOutcome) {
        let counter = match outcome {
            DeliveryOutcome::Succeeded => &self.delivered,
            DeliveryOutcome::Failed => &self.failed,
            DeliveryOutcome::Abandoned => &self.abandoned,
            DeliveryOutcome::Pending | DeliveryOutcome::Retrying => return,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Marks a delivery in flight until dropped, including when its task is
/// aborted.
struct InFlight {
    counters: Arc<Counters>,
    event_id: Uuid,
    subscription_id: String,
    finished: bool,
}

impl InFlight {
    fn start(counters: &Arc<Counters>, event_id: Uuid, subscription_id: &str) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self {
            counters: counters.clone(),
            event_id,
            subscription_id: subscription_id.to_string(),
            finished: false,
        }
    }

    fn finish(mut self, outcome: DeliveryOutcome) {
        self.finished = true;
        self.counters.record(outcome);
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        if !self.finished {
            self.counters.abandoned.fetch_add(1, Ordering::SeqCst);
            error!(
                event_id = %self.event_id,
                subscription_id = %self.subscription_id,
                outcome = "abandoned",
                "Webhook delivery failed: aborted at shutdown"
            );
        }
    }
}

/// Cheap, cloneable entry point for submitting events
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Arc<Event>>,
    counters: Arc<Counters>,
}

impl SchedulerHandle {
    /// A handle and the receiving end of its queue
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<Event>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = Self {
            tx,
            counters: Arc::new(Counters::default()),
        };
        (handle, rx)
    }

    /// Queue `event` for delivery without waiting.
    ///
    /// A full queue drops the event (logged, counted in
    /// [`SchedulerStats::dropped`]); it is not a delivery failure. After
    /// shutdown every submission is refused with [`SubmitError::Closed`].
    pub fn submit(&self, event: impl Into<Arc<Event>>) -> std::result::Result<(), SubmitError> {
        let event = event.into();
        match self.tx.try_send(event) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                info!(
                    event_id = %event.id(),
                    method = %event.method(),
                    path = %event.path(),
                    status = event.status(),
                    reason = "queue_full",
                    "Webhook event dropped"
                );
                Err(SubmitError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SubmitError::Closed),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.counters.snapshot()
    }
}

/// Owns the delivery loop and its worker tasks
pub struct DeliveryScheduler {
    handle: SchedulerHandle,
    shutdown: CancellationToken,
    run: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DeliveryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryScheduler")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl DeliveryScheduler {
    /// Start the delivery loop on the current tokio runtime
    pub fn start(dispatcher: Dispatcher) -> Result<Self> {
        Self::spawn(dispatcher, None)
    }

    /// Like [`start`](Self::start), also reporting every finished delivery
    pub fn start_with_outcomes(
        dispatcher: Dispatcher,
        outcomes: mpsc::UnboundedSender<DeliveryAttempt>,
    ) -> Result<Self> {
        Self::spawn(dispatcher, Some(outcomes))
    }

    fn spawn(
        dispatcher: Dispatcher,
        outcomes: Option<mpsc::UnboundedSender<DeliveryAttempt>>,
    ) -> Result<Self> {
        let config = dispatcher.worker().config();
        config.validate()?;
        let (max_in_flight, queue_capacity, grace) = (
            config.max_in_flight,
            config.queue_capacity,
            config.shutdown_grace,
        );

        let (handle, rx) = SchedulerHandle::channel(queue_capacity);
        let counters = handle.counters.clone();
        let shutdown = CancellationToken::new();

        info!(
            max_in_flight,
            queue_capacity,
            "Webhook delivery scheduler started"
        );

        let run = RunLoop {
            rx,
            slots: Arc::new(Semaphore::new(max_in_flight)),
            grace,
            dispatcher,
            counters,
            shutdown: shutdown.clone(),
            outcomes,
        };

        Ok(Self {
            handle,
            shutdown,
            run: parking_lot::Mutex::new(Some(tokio::spawn(run.run()))),
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Shortcut for `self.handle().submit(event)`
    pub fn submit(&self, event: impl Into<Arc<Event>>) -> std::result::Result<(), SubmitError> {
        self.handle.submit(event)
    }

    /// Tower layer that captures responses and submits them here
    pub fn layer(&self) -> WebhookLayer {
        WebhookLayer::new(self.handle())
    }

    pub fn stats(&self) -> SchedulerStats {
        self.handle.stats()
    }

    /// Stop accepting events and wind down.
    ///
    /// Queued events that never started are dropped. Running deliveries
    /// get the configured grace period; deliveries waiting to retry stop
    /// at once. Whatever is still running after the grace period is
    /// aborted and counted as abandoned. Calling this again is a no-op.
    pub async fn shutdown(&self) -> SchedulerStats {
        self.shutdown.cancel();
        let run = self.run.lock().take();
        if let Some(run) = run
            && let Err(e) = run.await
        {
            error!(error = %e, "Webhook delivery loop ended abnormally");
        }
        self.stats()
    }
}

impl Drop for DeliveryScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct RunLoop {
    rx: mpsc::Receiver<Arc<Event>>,
    slots: Arc<Semaphore>,
    grace: Duration,
    dispatcher: Dispatcher,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
    outcomes: Option<mpsc::UnboundedSender<DeliveryAttempt>>,
}

impl RunLoop {
    async fn run(mut self) {
        let mut tasks = JoinSet::new();

        'events: loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    log_join(joined);
                    continue;
                }
                event = self.rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let matched = self.dispatcher.resolve(&event).await;
            let total = matched.len();

            for (started, subscription) in matched.into_iter().enumerate() {
                let permit = tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => {
                        warn!(
                            event_id = %event.id(),
                            skipped = total - started,
                            "Shutdown before all deliveries for event started"
                        );
                        break 'events;
                    }
                    permit = self.slots.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break 'events,
                    },
                };

                let in_flight = InFlight::start(&self.counters, event.id(), subscription.id());
                let worker = self.dispatcher.worker().clone();
                let event = event.clone();
                let cancel = self.shutdown.clone();
                let outcomes = self.outcomes.clone();

                tasks.spawn(async move {
                    let attempt = worker.deliver(&event, &subscription, &cancel).await;
                    in_flight.finish(attempt.outcome);
                    drop(permit);
                    if let Some(outcomes) = outcomes {
                        let _ = outcomes.send(attempt);
                    }
                });
            }
        }

        self.drain_queue();
        self.wait_for_tasks(tasks).await;
        info!(stats = ?self.counters.snapshot(), "Webhook delivery scheduler stopped");
    }

    /// Close the queue and drop everything still in it
    fn drain_queue(&mut self) {
        self.rx.close();
        while let Ok(event) = self.rx.try_recv() {
            self.counters.dropped.fetch_add(1, Ordering::SeqCst);
            info!(
                event_id = %event.id(),
                method = %event.method(),
                path = %event.path(),
                status = event.status(),
                reason = "shutdown",
                "Webhook event dropped"
            );
        }
    }

    async fn wait_for_tasks(&self, mut tasks: JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }

        let finished = tokio::time::timeout(self.grace, async {
            while let Some(joined) = tasks.join_next().await {
                log_join(joined);
            }
        })
        .await;

        if finished.is_err() {
            warn!(
                remaining = tasks.len(),
                grace_ms = u64::try_from(self.grace.as_millis()).unwrap_or(u64::MAX),
                "Abandoning webhook deliveries still running after grace period"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined
        && e.is_panic()
    {
        error!(error = %e, "Webhook delivery task panicked");
    }
}
