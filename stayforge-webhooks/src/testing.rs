//! In-process transport for unit tests

use crate::transport::{OutboundRequest, Transport, TransportResponse};
use crate::{Result, WebhookError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Step {
    Status(u16),
    /// No response, as if the connection was refused
    Error,
    /// Never answers
    Hang,
}

/// Replays a script of responses, then repeats `fallback`
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    latency: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: impl IntoIterator<Item = Step>, fallback: Step) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn always(step: Step) -> Self {
        Self::new([], step)
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most simultaneous calls seen
    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Calls started and not yet returned or dropped
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().clone()
    }
}

struct Call<'a>(&'a AtomicUsize);

impl Drop for Call<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post(&self, request: OutboundRequest) -> Result<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        // Released on return and when the caller gives up on the call
        let _call = Call(&self.in_flight);
        self.requests.lock().push(request);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let step = self.script.lock().pop_front().unwrap_or(self.fallback);
        if matches!(step, Step::Hang) {
            std::future::pending::<()>().await;
        }

        match step {
            Step::Status(status) => Ok(TransportResponse { status, body: None }),
            _ => Err(WebhookError::Internal("connection refused".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::HeaderMap;

    fn request() -> OutboundRequest {
        OutboundRequest {
            url: "https://example.test/hook".parse().unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_call_leaves_flight() {
        let transport = ScriptedTransport::new([Step::Hang], Step::Status(200))
            .with_latency(Duration::from_millis(5));

        let cut = tokio::time::timeout(Duration::from_secs(1), transport.post(request())).await;
        assert!(cut.is_err());
        assert_eq!(transport.in_flight(), 0);

        let (a, b) = tokio::join!(transport.post(request()), transport.post(request()));
        assert_eq!(a.unwrap().status, 200);
        assert_eq!(b.unwrap().status, 200);
        assert_eq!(transport.peak(), 2);
        assert_eq!(transport.in_flight(), 0);
    }
}
