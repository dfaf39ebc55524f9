//! Outbound HTTP

use crate::{Result, WebhookConfig, WebhookError};
use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// A single POST to a subscriber
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    /// Response text, if it could be read
    pub body: Option<String>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends delivery requests.
///
/// An `Err` means no response arrived (connect failure, reset, TLS error).
/// Any response, whatever its status, is `Ok`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: OutboundRequest) -> Result<TransportResponse>;
}

/// [`Transport`] backed by a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Option<Duration>,
}

impl ReqwestTransport {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()?;
        Ok(Self {
            client,
            timeout: Some(config.timeout),
        })
    }

    /// Wrap an existing client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            timeout: None,
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post(&self, request: OutboundRequest) -> Result<TransportResponse> {
        let response = self
            .client
            .post(request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| match self.timeout {
                Some(timeout) if e.is_timeout() => {
                    WebhookError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
                }
                _ => WebhookError::HttpError(e),
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.ok();
        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_response_success_range() {
        let ok = TransportResponse { status: 204, body: None };
        let redirect = TransportResponse { status: 301, body: None };
        assert!(ok.is_success());
        assert!(!redirect.is_success());
    }

    #[tokio::test]
    async fn test_reqwest_transport_posts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("x-test", "1"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(&WebhookConfig::default()).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-test", "1".parse().unwrap());

        let response = transport
            .post(OutboundRequest {
                url: format!("{}/hook", server.uri()).parse().unwrap(),
                headers,
                body: Bytes::from_static(b"{}"),
            })
            .await
            .unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(response.body.as_deref(), Some("busy"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_error() {
        let transport = ReqwestTransport::new(&WebhookConfig::default()).unwrap();
        let result = transport
            .post(OutboundRequest {
                url: "http://127.0.0.1:9/hook".parse().unwrap(),
                headers: HeaderMap::new(),
                body: Bytes::new(),
            })
            .await;

        assert!(result.is_err());
    }
}
