//! Delivering one event to one subscription, with retries

use crate::payload::{DeliveryAttempt, DeliveryPayload};
use crate::signature::headers;
use crate::transport::{OutboundRequest, ReqwestTransport, Transport, TransportResponse};
use crate::{Event, Result, Subscription, WebhookConfig, WebhookError, WebhookSignature};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, header};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Performs signed, retried POSTs for (event, subscription) pairs
#[derive(Clone)]
pub struct DeliveryWorker {
    config: Arc<WebhookConfig>,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for DeliveryWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryWorker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DeliveryWorker {
    /// Worker using a `reqwest` client built from `config`
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: WebhookConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
        }
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Deliver `event` to `subscription` until it succeeds, attempts run
    /// out, or `cancel` fires while waiting to retry.
    ///
    /// Never returns an error: every way this can end is recorded in the
    /// returned attempt's outcome.
    pub async fn deliver(
        &self,
        event: &Event,
        subscription: &Subscription,
        cancel: &CancellationToken,
    ) -> DeliveryAttempt {
        let mut attempt = DeliveryAttempt::new(event, subscription);

        let body = match self.encode(event, &attempt) {
            Ok(body) => body,
            Err(e) => {
                error!(
                    event_id = %event.id(),
                    subscription_id = %subscription.id(),
                    error = %e,
                    "Webhook payload rejected"
                );
                attempt.mark_rejected(e.to_string());
                return attempt;
            }
        };
        let base_headers = self.base_headers(event, subscription, &attempt);
        let signer = subscription.secret.as_deref().map(WebhookSignature::new);
        let policy = &self.config.retry_policy;

        loop {
            let number = attempt.attempts + 1;
            debug!(
                event_id = %event.id(),
                subscription_id = %subscription.id(),
                target_url = %subscription.target_url,
                attempt = number,
                "Webhook delivery attempt"
            );

            let request =
                match Self::request(subscription, &base_headers, &body, number, signer.as_ref()) {
                    Ok(request) => request,
                    Err(e) => {
                        error!(
                            subscription_id = %subscription.id(),
                            error = %e,
                            "Failed to sign webhook payload"
                        );
                        attempt.mark_rejected(e.to_string());
                        return attempt;
                    }
                };

            let (error, status) = match self.send(request).await {
                Ok(response) if response.is_success() => {
                    info!(
                        event_id = %event.id(),
                        subscription_id = %subscription.id(),
                        target_url = %subscription.target_url,
                        status = response.status,
                        attempt = number,
                        "Webhook delivered"
                    );
                    attempt.mark_succeeded(response.status);
                    return attempt;
                }
                Ok(response) => (describe_status(&response), Some(response.status)),
                Err(e) => (e.to_string(), None),
            };

            let will_retry = policy.should_retry(number);
            attempt.mark_failed(error, status, will_retry);

            if !will_retry {
                error!(
                    event_id = %event.id(),
                    subscription_id = %subscription.id(),
                    target_url = %subscription.target_url,
                    attempts = attempt.attempts,
                    error = attempt.last_error.as_deref().unwrap_or_default(),
                    "Webhook delivery failed permanently"
                );
                return attempt;
            }

            let delay = policy.delay_for_attempt(number);
            warn!(
                event_id = %event.id(),
                subscription_id = %subscription.id(),
                attempt = number,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = attempt.last_error.as_deref().unwrap_or_default(),
                "Webhook delivery failed, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(
                        event_id = %event.id(),
                        subscription_id = %subscription.id(),
                        attempts = attempt.attempts,
                        "Webhook delivery abandoned during shutdown"
                    );
                    attempt.mark_abandoned("shut down while waiting to retry");
                    return attempt;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn encode(&self, event: &Event, attempt: &DeliveryAttempt) -> Result<Bytes> {
        let payload = DeliveryPayload::from_event(attempt.id, event, &self.config);
        let body = payload.to_bytes()?;

        if body.len() > self.config.max_payload_size {
            return Err(WebhookError::PayloadTooLarge {
                size: body.len(),
                max: self.config.max_payload_size,
            });
        }
        Ok(Bytes::from(body))
    }

    /// Headers shared by every attempt of one delivery.
    ///
    /// Subscription headers go in first so they can't replace the
    /// delivery metadata.
    fn base_headers(
        &self,
        event: &Event,
        subscription: &Subscription,
        attempt: &DeliveryAttempt,
    ) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &subscription.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.insert(name, value);
                }
                _ => warn!(
                    subscription_id = %subscription.id(),
                    header = %name,
                    "Skipping invalid custom header"
                ),
            }
        }

        map.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let fixed = [
            (header::USER_AGENT, self.config.user_agent.clone()),
            (headers::WEBHOOK_ID, attempt.id.to_string()),
            (
                headers::EVENT,
                format!("{} {}", event.method(), event.path()),
            ),
        ];
        for (name, value) in fixed {
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    map.insert(name, value);
                }
                Err(_) => warn!(header = %name, "Skipping header with invalid value"),
            }
        }
        map
    }

    fn request(
        subscription: &Subscription,
        base_headers: &HeaderMap,
        body: &Bytes,
        number: u32,
        signer: Option<&WebhookSignature>,
    ) -> Result<OutboundRequest> {
        let mut map = base_headers.clone();
        map.insert(headers::ATTEMPT, HeaderValue::from(number));

        if let Some(signer) = signer {
            let signature = signer.sign(body)?;
            let value = HeaderValue::from_str(&signature)
                .map_err(|e| WebhookError::Internal(e.to_string()))?;
            map.insert(headers::SIGNATURE, value);
        }

        Ok(OutboundRequest {
            url: subscription.target_url.clone(),
            headers: map,
            body: body.clone(),
        })
    }

    /// One call, bounded by the configured timeout
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse> {
        let timeout = self.config.timeout;
        match tokio::time::timeout(timeout, self.transport.post(request)).await {
            Ok(result) => result,
            Err(_) => Err(WebhookError::Timeout(
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }
}

fn describe_status(response: &TransportResponse) -> String {
    match response.body.as_deref().map(str::trim) {
        Some(body) if !body.is_empty() => format!("HTTP {}: {}", response.status, body),
        _ => format!("HTTP {}", response.status),
    }
}
