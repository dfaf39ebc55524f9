//! Tower middleware that captures responses as webhook events
//!
//! The response body is read to the end before anything goes back to the
//! caller, then replayed unchanged. Capturing never changes what the caller
//! sees: same status, same headers, same bytes, same trailers. If the
//! handler's body fails part way, the caller gets the bytes read so far and
//! then that same error, and no event fires.
//!
//! ```rust,ignore
//! let scheduler = DeliveryScheduler::start(dispatcher)?;
//! let app = Router::new()
//!     .route("/rooms/{id}", post(create_room))
//!     .layer(scheduler.layer());
//! ```

use crate::event::{Event, HeaderList};
use crate::{BoxError, CaptureError, SchedulerHandle, SubmitError};
use bytes::{Bytes, BytesMut};
use futures::stream;
use http::{HeaderMap, Request, Response};
use http_body::{Body, Frame};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use std::future::Future;
use std::pin::{Pin, pin};
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::{debug, warn};

/// Log target for per-request capture lines
pub const LOG_TARGET: &str = "stayforge::webhooks";

/// Body type of intercepted responses
pub type WebhookBody = BoxBody<Bytes, BoxError>;

/// Layer producing [`WebhookService`]
#[derive(Debug, Clone)]
pub struct WebhookLayer {
    handle: SchedulerHandle,
}

impl WebhookLayer {
    pub fn new(handle: SchedulerHandle) -> Self {
        Self { handle }
    }
}

impl<S> Layer<S> for WebhookLayer {
    type Service = WebhookService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        WebhookService {
            inner,
            handle: self.handle.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookService<S> {
    inner: S,
    handle: SchedulerHandle,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for WebhookService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<WebhookBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // Use the instance that was polled ready; leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let handle = self.handle.clone();

        let method = req.method().as_str().to_string();
        let path = req.uri().path().to_string();
        let request_headers = HeaderList::from_http(req.headers());
        let started = Instant::now();

        Box::pin(async move {
            let response = inner.call(req).await?;
            let (parts, body) = response.into_parts();

            let captured = drain(body).await;
            let elapsed = started.elapsed();
            let status = parts.status.as_u16();

            debug!(
                target: LOG_TARGET,
                catch_path = %path,
                catch_method = %method,
                catch_status = status,
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "Intercepted response"
            );

            let event = match &captured.error {
                Some(e) => Err(CaptureError::Body(e.to_string())),
                None => Event::builder(method.as_str(), path.as_str())
                    .status(status)
                    .request_headers(request_headers)
                    .response_headers(HeaderList::from_http(&parts.headers))
                    .response_body(captured.data.clone())
                    .elapsed(elapsed)
                    .build(),
            };
            match event {
                Ok(event) => match handle.submit(event) {
                    // Overload drops are counted and logged by the handle
                    Ok(()) | Err(SubmitError::QueueFull) => {}
                    Err(SubmitError::Closed) => debug!(
                        target: LOG_TARGET,
                        method = %method,
                        path = %path,
                        status,
                        "Delivery scheduler stopped, no webhook fired"
                    ),
                },
                Err(e) => warn!(
                    target: LOG_TARGET,
                    method = %method,
                    path = %path,
                    status,
                    error = %e,
                    "Response capture failed, no webhook fired"
                ),
            }

            Ok(Response::from_parts(parts, captured.replay()))
        })
    }
}

/// Everything read from a response body
struct Captured {
    data: Bytes,
    trailers: Option<HeaderMap>,
    error: Option<BoxError>,
}

impl Captured {
    /// A body yielding exactly what was read, ending the same way
    fn replay(self) -> WebhookBody {
        if self.trailers.is_none() && self.error.is_none() {
            return Full::new(self.data).map_err(|never| match never {}).boxed();
        }

        let mut frames: Vec<Result<Frame<Bytes>, BoxError>> = Vec::with_capacity(2);
        if !self.data.is_empty() {
            frames.push(Ok(Frame::data(self.data)));
        }
        match self.error {
            Some(e) => frames.push(Err(e)),
            None => {
                if let Some(trailers) = self.trailers {
                    frames.push(Ok(Frame::trailers(trailers)));
                }
            }
        }
        StreamBody::new(stream::iter(frames)).boxed()
    }
}

async fn drain<B>(body: B) -> Captured
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let mut body = pin!(body);
    let mut data = BytesMut::new();
    let mut trailers: Option<HeaderMap> = None;

    while let Some(frame) = body.as_mut().frame().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                return Captured {
                    data: data.freeze(),
                    trailers,
                    error: Some(e.into()),
                };
            }
        };
        match frame.into_data() {
            Ok(chunk) => data.extend_from_slice(&chunk),
            Err(frame) => {
                if let Ok(more) = frame.into_trailers() {
                    match trailers.as_mut() {
                        Some(existing) => existing.extend(more),
                        None => trailers = Some(more),
                    }
                }
            }
        }
    }

    Captured {
        data: data.freeze(),
        trailers,
        error: None,
    }
}
