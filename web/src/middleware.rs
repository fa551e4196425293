//! Axum middleware for request tracking and observability.
//!
//! The request-tracing layer wraps every route:
//!
//! 1. **Request ID**: taken from `X-Request-ID` or generated, stored in
//!    request extensions and echoed on the response
//! 2. **Span**: `http_request` with method, path and request id; an inbound
//!    `traceparent` becomes its remote parent
//! 3. **Completion log**: `HTTP request completed` with method, path, status,
//!    duration and client IP
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use order_pipeline_web::middleware::request_tracing_layer;
//!
//! let app = Router::new()
//!     .route("/order", post(create_order))
//!     .layer(request_tracing_layer(carrier));
//! ```

use crate::extractors::{RequestId, client_ip};
use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    response::Response,
};
use order_pipeline_core::envelope::Headers;
use order_pipeline_core::propagation::TraceCarrier;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Longest inbound request id that is accepted as-is.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Create a layer that adds request ids, trace continuation and completion logs.
#[must_use]
pub fn request_tracing_layer(carrier: Arc<dyn TraceCarrier>) -> RequestTracingLayer {
    RequestTracingLayer { carrier }
}

/// Layer for request tracing.
#[derive(Clone)]
pub struct RequestTracingLayer {
    carrier: Arc<dyn TraceCarrier>,
}

impl<S> Layer<S> for RequestTracingLayer {
    type Service = RequestTracingMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestTracingMiddleware {
            inner,
            carrier: Arc::clone(&self.carrier),
        }
    }
}

/// Middleware service for request tracing.
#[derive(Clone)]
pub struct RequestTracingMiddleware<S> {
    inner: S,
    carrier: Arc<dyn TraceCarrier>,
}

/// Inbound request id, if present and sane; otherwise a fresh UUID.
fn request_id_from(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.len() <= MAX_REQUEST_ID_LEN)
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string)
}

/// Flatten HTTP headers into the carrier's header map (lowercase keys).
fn carrier_headers(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

impl<S> Service<Request> for RequestTracingMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let request_id = request_id_from(req.headers());
        req.extensions_mut().insert(RequestId(request_id.clone()));

        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let client = client_ip(req.headers());

        let span = tracing::info_span!(
            "http_request",
            request_id = %request_id,
            method = %method,
            path = %path,
        );
        if let Some(parent) = self.carrier.extract(&carrier_headers(req.headers())) {
            self.carrier.attach(&span, &parent);
        }

        let started = Instant::now();
        let fut = self.inner.call(req).instrument(span.clone());

        Box::pin(async move {
            let mut response = fut.await?;

            tracing::info!(
                parent: &span,
                method = %method,
                path = %path,
                status = response.status().as_u16(),
                duration_ms = started.elapsed().as_secs_f64() * 1000.0,
                client_ip = %client,
                "HTTP request completed"
            );

            if let Ok(header_value) = HeaderValue::from_str(&request_id) {
                response
                    .headers_mut()
                    .insert(REQUEST_ID_HEADER, header_value);
            }

            Ok(response)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, routing::get};
    use order_pipeline_core::propagation::{NoopTraceCarrier, TraceContext};
    use std::sync::Mutex;
    use tower::ServiceExt;
    use tracing::Span;

    /// Reads `traceparent` verbatim and records attach calls.
    #[derive(Default)]
    struct RecordingCarrier {
        attached: Mutex<Vec<TraceContext>>,
    }

    impl TraceCarrier for RecordingCarrier {
        fn inject(&self, _context: &TraceContext, _headers: &mut Headers) {}

        fn extract(&self, headers: &Headers) -> Option<TraceContext> {
            headers
                .get("traceparent")
                .map(|v| TraceContext::new(v.clone(), "span", 1))
        }

        fn current(&self, _span: &Span) -> Option<TraceContext> {
            None
        }

        fn attach(&self, _span: &Span, parent: &TraceContext) {
            self.attached.lock().unwrap().push(parent.clone());
        }
    }

    fn app(carrier: Arc<dyn TraceCarrier>) -> Router {
        Router::new()
            .route("/test", get(|| async { "ok" }))
            .layer(request_tracing_layer(carrier))
    }

    #[tokio::test]
    async fn test_request_id_generated_if_missing() {
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();

        let response = app(Arc::new(NoopTraceCarrier)).oneshot(request).await.unwrap();

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .expect("Request ID header should be present")
            .to_str()
            .unwrap();
        assert!(Uuid::parse_str(request_id).is_ok());
    }

    #[tokio::test]
    async fn test_request_id_preserved_from_request() {
        let request = Request::builder()
            .uri("/test")
            .header(REQUEST_ID_HEADER, "req-42")
            .body(Body::empty())
            .unwrap();

        let response = app(Arc::new(NoopTraceCarrier)).oneshot(request).await.unwrap();

        assert_eq!(response.headers().get(REQUEST_ID_HEADER).unwrap(), "req-42");
    }

    #[tokio::test]
    async fn test_oversized_request_id_is_replaced() {
        let request = Request::builder()
            .uri("/test")
            .header(REQUEST_ID_HEADER, "x".repeat(500))
            .body(Body::empty())
            .unwrap();

        let response = app(Arc::new(NoopTraceCarrier)).oneshot(request).await.unwrap();

        let request_id = response.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(request_id).is_ok());
    }

    #[tokio::test]
    async fn test_inbound_traceparent_becomes_parent() {
        let carrier = Arc::new(RecordingCarrier::default());
        let request = Request::builder()
            .uri("/test")
            .header("traceparent", "trace-abc")
            .body(Body::empty())
            .unwrap();

        let response = app(carrier.clone()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), 200);
        let attached = carrier.attached.lock().unwrap();
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].trace_id, "trace-abc");
    }

    #[tokio::test]
    async fn test_no_traceparent_no_parent() {
        let carrier = Arc::new(RecordingCarrier::default());
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();

        app(carrier.clone()).oneshot(request).await.unwrap();

        assert!(carrier.attached.lock().unwrap().is_empty());
    }
}
