//! Order event producer.
//!
//! ```text
//! handle_create_order(request)
//!   span "create_order"
//!     validate              ── ValidationError → no bus interaction
//!     order_id = uuid v4
//!     OrderCreatedEvent { created_at = clock.now() }
//!     span "publish_order_created_event"
//!       payload = json(event)
//!       envelope + headers (event_type, source_service, content_type)
//!       carrier.inject(current span)          ── traceparent
//!       bus.publish(topic, envelope)          ── exactly once, no retry
//!   { order_id, status: "created" }
//! ```

use crate::types::{ORDERS_TOPIC, OrderCreatedEvent, OrderRequest, OrderResponse, ValidationError};
use order_pipeline_core::envelope::{
    CONTENT_TYPE_HEADER, EVENT_TYPE_HEADER, Envelope, SOURCE_SERVICE_HEADER,
};
use order_pipeline_core::environment::Clock;
use order_pipeline_core::event::{Event, EventError};
use order_pipeline_core::message_bus::{BusError, MessageBus};
use order_pipeline_core::propagation::TraceCarrier;
use order_pipeline_runtime::metrics::{BusMetrics, OrderMetrics};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{Instrument, Span, error, info, warn};
use uuid::Uuid;

/// Default `source_service` header value.
pub const DEFAULT_SERVICE_NAME: &str = "order-service";

/// Why an order was not created.
#[derive(Error, Debug)]
pub enum ProducerError {
    /// The request was rejected before touching the bus
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The event could not be encoded
    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] EventError),

    /// The bus did not accept the envelope; the order is not created
    #[error("Failed to publish event: {0}")]
    Publish(#[from] BusError),
}

/// Validates order requests and publishes `OrderCreated` events.
pub struct OrderProducer {
    bus: Arc<dyn MessageBus>,
    carrier: Arc<dyn TraceCarrier>,
    clock: Arc<dyn Clock>,
    topic: String,
    service_name: String,
}

impl OrderProducer {
    /// Create a producer publishing to [`ORDERS_TOPIC`].
    #[must_use]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        carrier: Arc<dyn TraceCarrier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bus,
            carrier,
            clock,
            topic: ORDERS_TOPIC.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }

    /// Publish to a different topic.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Set the `source_service` header value.
    #[must_use]
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    /// Topic events are published to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Validate, build and publish one order.
    ///
    /// # Errors
    ///
    /// - [`ProducerError::Validation`] for a bad request (nothing published)
    /// - [`ProducerError::Serialization`] if the event cannot be encoded
    /// - [`ProducerError::Publish`] if the bus rejects the envelope
    pub async fn handle_create_order(
        &self,
        request: OrderRequest,
    ) -> Result<OrderResponse, ProducerError> {
        let span = tracing::info_span!(
            "create_order",
            "order.id" = tracing::field::Empty,
            "order.total_price" = ?request.total_price,
            "order.customer_id" = ?request.customer_id,
            "order.product_id" = ?request.product_id,
        );
        self.create_order(request).instrument(span).await
    }

    async fn create_order(&self, request: OrderRequest) -> Result<OrderResponse, ProducerError> {
        let order = match request.validate() {
            Ok(order) => order,
            Err(e) => {
                warn!(error = %e, "Invalid order request");
                OrderMetrics::record_rejected("validation");
                return Err(e.into());
            },
        };

        let order_id = Uuid::new_v4().to_string();
        Span::current().record("order.id", order_id.as_str());

        let event = OrderCreatedEvent::new(order_id.clone(), &order, self.clock.now());
        info!(
            order_id = %event.order_id,
            event_type = event.event_type(),
            created_at = %event.created_at,
            "Order event created"
        );

        if let Err(e) = self.publish(&event).await {
            OrderMetrics::record_rejected("publish");
            return Err(e);
        }

        OrderMetrics::record_created();
        info!(order_id = %order_id, status = 201, "Order created successfully");
        Ok(OrderResponse::created(order_id))
    }

    async fn publish(&self, event: &OrderCreatedEvent) -> Result<(), ProducerError> {
        let payload = event.to_bytes().inspect_err(|e| {
            error!(order_id = %event.order_id, error = %e, "Failed to serialize event");
        })?;

        let mut envelope = Envelope::new(payload)
            .with_header(EVENT_TYPE_HEADER, event.event_type())
            .with_header(SOURCE_SERVICE_HEADER, self.service_name.as_str())
            .with_header(CONTENT_TYPE_HEADER, "application/json");

        let span = tracing::info_span!(
            "publish_order_created_event",
            "message.id" = %envelope.id(),
            "messaging.destination" = %self.topic,
            "event.type" = event.event_type(),
            "order.id" = %event.order_id,
        );

        if let Some(context) = self.carrier.inject_span(&span, envelope.headers_mut()) {
            tracing::debug!(parent: &span, trace_id = %context.trace_id, "Trace context injected");
        }

        let started = Instant::now();
        match self
            .bus
            .publish(&self.topic, &envelope)
            .instrument(span.clone())
            .await
        {
            Ok(()) => {
                BusMetrics::record_publish(started.elapsed());
                info!(
                    parent: &span,
                    message_id = %envelope.id(),
                    topic = %self.topic,
                    "Event published"
                );
                Ok(())
            },
            Err(e) => {
                BusMetrics::record_publish_error();
                error!(
                    parent: &span,
                    message_id = %envelope.id(),
                    topic = %self.topic,
                    error = %e,
                    "Failed to publish order created event"
                );
                Err(e.into())
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use order_pipeline_core::envelope::Headers;
    use order_pipeline_core::propagation::{NoopTraceCarrier, TraceContext};
    use order_pipeline_testing::{InMemoryMessageBus, test_clock};

    /// Injects a fixed context regardless of the span.
    struct FixedCarrier;

    impl TraceCarrier for FixedCarrier {
        fn inject(&self, context: &TraceContext, headers: &mut Headers) {
            headers.insert("x-trace".to_string(), context.trace_id.clone());
        }

        fn extract(&self, headers: &Headers) -> Option<TraceContext> {
            headers.get("x-trace").map(|t| TraceContext::new(t.clone(), "s", 1))
        }

        fn current(&self, _span: &Span) -> Option<TraceContext> {
            Some(TraceContext::new("trace-1", "span-1", 1))
        }

        fn attach(&self, _span: &Span, _parent: &TraceContext) {}
    }

    fn producer(bus: &InMemoryMessageBus, carrier: Arc<dyn TraceCarrier>) -> OrderProducer {
        OrderProducer::new(Arc::new(bus.clone()), carrier, Arc::new(test_clock()))
    }

    #[tokio::test]
    async fn valid_order_is_published_once() {
        let bus = InMemoryMessageBus::new();
        let producer = producer(&bus, Arc::new(NoopTraceCarrier));

        let response = producer
            .handle_create_order(OrderRequest::new(150, 7, 3))
            .await
            .unwrap();

        assert_eq!(response.status, "created");
        assert!(Uuid::parse_str(&response.order_id).is_ok());
        assert_eq!(bus.publish_attempts(), 1);

        let published = bus.published(ORDERS_TOPIC);
        assert_eq!(published.len(), 1);
        let event = OrderCreatedEvent::from_bytes(published[0].payload()).unwrap();
        assert_eq!(event.order_id, response.order_id);
        assert_eq!(event.total_price, 150);
        assert_eq!(event.created_at, "2025-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn envelope_carries_identifying_headers() {
        let bus = InMemoryMessageBus::new();
        let producer = producer(&bus, Arc::new(NoopTraceCarrier)).with_service_name("orders-eu");

        producer
            .handle_create_order(OrderRequest::new(1, 2, 3))
            .await
            .unwrap();

        let envelope = &bus.published(ORDERS_TOPIC)[0];
        assert_eq!(envelope.header(EVENT_TYPE_HEADER), Some("OrderCreated"));
        assert_eq!(envelope.header(SOURCE_SERVICE_HEADER), Some("orders-eu"));
        assert_eq!(envelope.header(CONTENT_TYPE_HEADER), Some("application/json"));
    }

    #[tokio::test]
    async fn trace_context_is_injected() {
        let bus = InMemoryMessageBus::new();
        let producer = producer(&bus, Arc::new(FixedCarrier));

        producer
            .handle_create_order(OrderRequest::new(1, 2, 3))
            .await
            .unwrap();

        let envelope = &bus.published(ORDERS_TOPIC)[0];
        assert_eq!(envelope.header("x-trace"), Some("trace-1"));
    }

    #[tokio::test]
    async fn invalid_order_never_publishes() {
        let bus = InMemoryMessageBus::new();
        let producer = producer(&bus, Arc::new(NoopTraceCarrier));

        let err = producer
            .handle_create_order(OrderRequest::new(0, 7, 3))
            .await
            .unwrap_err();

        assert!(matches!(err, ProducerError::Validation(ValidationError::NotPositive("total_price"))));
        assert_eq!(bus.publish_attempts(), 0);
    }

    #[tokio::test]
    async fn publish_failure_is_reported() {
        let bus = InMemoryMessageBus::new();
        bus.fail_publishes(Some("broker unreachable"));
        let producer = producer(&bus, Arc::new(NoopTraceCarrier));

        let err = producer
            .handle_create_order(OrderRequest::new(150, 7, 3))
            .await
            .unwrap_err();

        assert!(matches!(err, ProducerError::Publish(BusError::PublishFailed { .. })));
        assert_eq!(bus.publish_attempts(), 1);
        assert!(bus.published(ORDERS_TOPIC).is_empty());
    }

    #[tokio::test]
    async fn custom_topic_is_used() {
        let bus = InMemoryMessageBus::new();
        let producer = producer(&bus, Arc::new(NoopTraceCarrier)).with_topic("orders-v2");
        assert_eq!(producer.topic(), "orders-v2");

        producer
            .handle_create_order(OrderRequest::new(1, 2, 3))
            .await
            .unwrap();

        assert_eq!(bus.published("orders-v2").len(), 1);
        assert!(bus.published(ORDERS_TOPIC).is_empty());
    }
}
