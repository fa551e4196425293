//! The consumer's span continues the trace started by the inbound HTTP request.
//!
//! `traceparent` on `POST /order` → request span → `create_order` →
//! `publish_order_created_event` → envelope headers → delivery span.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use opentelemetry::trace::TracerProvider as _;
use order_pipeline_core::Headers;
use order_pipeline_core::environment::SystemClock;
use order_pipeline_core::propagation::{TraceCarrier, TraceContext};
use order_pipeline_telemetry::W3cTraceCarrier;
use order_pipeline_testing::{InMemoryMessageBus, wait_until};
use order_service::{ORDERS_TOPIC, OrderProducer};
use report_service::{ReportHandler, ReportStore, report_consumer};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tower::ServiceExt;
use tracing::Span;
use tracing_subscriber::layer::SubscriberExt;

const INBOUND_TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
const INBOUND_SPAN_ID: &str = "00f067aa0ba902b7";

/// W3C carrier that remembers every parent it attaches.
#[derive(Default)]
struct RecordingCarrier {
    inner: W3cTraceCarrier,
    attached: Mutex<Vec<TraceContext>>,
}

impl TraceCarrier for RecordingCarrier {
    fn inject(&self, context: &TraceContext, headers: &mut Headers) {
        self.inner.inject(context, headers);
    }

    fn extract(&self, headers: &Headers) -> Option<TraceContext> {
        self.inner.extract(headers)
    }

    fn current(&self, span: &Span) -> Option<TraceContext> {
        self.inner.current(span)
    }

    fn attach(&self, span: &Span, parent: &TraceContext) {
        self.attached.lock().unwrap().push(parent.clone());
        self.inner.attach(span, parent);
    }
}

#[tokio::test]
async fn delivery_span_joins_request_trace() {
    let provider = opentelemetry_sdk::trace::TracerProvider::builder().build();
    let subscriber = tracing_subscriber::registry()
        .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("pipeline-test")));
    let _default = tracing::subscriber::set_default(subscriber);

    let bus = InMemoryMessageBus::new();
    let carrier = Arc::new(RecordingCarrier::default());
    let store = Arc::new(ReportStore::new());
    let (_shutdown, shutdown_rx) = broadcast::channel(1);

    report_consumer(
        ORDERS_TOPIC,
        Arc::new(bus.clone()),
        carrier.clone(),
        ReportHandler::new(Arc::clone(&store), Arc::new(SystemClock)),
        shutdown_rx,
    )
    .unwrap()
    .start()
    .await
    .unwrap();

    let producer = OrderProducer::new(Arc::new(bus.clone()), carrier.clone(), Arc::new(SystemClock));
    let orders = order_service::build_router(order_service::AppState::new(producer), carrier.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/order")
        .header(header::CONTENT_TYPE, "application/json")
        .header(
            "traceparent",
            format!("00-{INBOUND_TRACE_ID}-{INBOUND_SPAN_ID}-01"),
        )
        .body(Body::from(r#"{"total_price":150,"customer_id":7,"product_id":3}"#))
        .unwrap();
    let response = orders.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let envelope = &bus.published(ORDERS_TOPIC)[0];
    let injected = carrier.extract(envelope.headers()).expect("envelope carries traceparent");
    assert_eq!(injected.trace_id, INBOUND_TRACE_ID);
    assert_ne!(injected.span_id, INBOUND_SPAN_ID);

    assert!(wait_until(Duration::from_secs(2), || store.len() == 1).await);

    let attached = carrier.attached.lock().unwrap().clone();
    // request middleware first, then the delivery span
    assert_eq!(attached.len(), 2);
    assert_eq!(attached[0].span_id, INBOUND_SPAN_ID);
    assert_eq!(attached[1], injected);
}
