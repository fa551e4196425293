//! `OrderCreated` processing.
//!
//! [`ReportHandler`] is the application half of the runtime's delivery
//! consumer: it turns an envelope into an [`OrderReport`] and appends it to the
//! store. The consumer loop around it owns subscription, trace continuation
//! and ack/nack.
//!
//! Per envelope:
//!
//! ```text
//! payload ── decode ──✗──► Malformed  (nack, store unchanged)
//!              │
//!              ▼
//! created_at ── parse ──✗──► now()    (warn, parse_error, fallback metric)
//!              │
//!              ▼
//! OrderReport { processed_at = now() } ── append ──► Ok (ack)
//! ```

use crate::store::{OrderReport, ReportStore};
use chrono::{DateTime, Utc};
use order_pipeline_core::envelope::Envelope;
use order_pipeline_core::environment::Clock;
use order_pipeline_core::event::Event;
use order_pipeline_core::message_bus::MessageBus;
use order_pipeline_core::propagation::TraceCarrier;
use order_pipeline_runtime::consumer::{
    ConsumerError, DeliveryConsumer, DeliveryHandler, HandlerError,
};
use order_pipeline_runtime::metrics::ReportMetrics;
use order_service::OrderCreatedEvent;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Consumer name used in logs.
pub const CONSUMER_NAME: &str = "report-service";

/// Name the per-delivery span is exported under.
pub const DELIVERY_SPAN_NAME: &str = "process_order_created_event";

/// Builds reports from `OrderCreated` envelopes.
pub struct ReportHandler {
    store: Arc<ReportStore>,
    clock: Arc<dyn Clock>,
}

impl ReportHandler {
    /// Create a handler appending to `store`.
    #[must_use]
    pub fn new(store: Arc<ReportStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn process(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let event = OrderCreatedEvent::from_bytes(envelope.payload()).map_err(|e| {
            error!(message_id = %envelope.id(), error = %e, "Failed to decode order created event");
            HandlerError::Malformed(e.to_string())
        })?;

        let span = tracing::info_span!(
            "store_order_report",
            "order.id" = %event.order_id,
            "order.total_price" = event.total_price,
            "order.customer_id" = event.customer_id,
            "order.product_id" = event.product_id,
            parse_error = tracing::field::Empty,
        );
        span.in_scope(|| {
            self.store_report(event, &span);
        });
        Ok(())
    }

    fn store_report(&self, event: OrderCreatedEvent, span: &tracing::Span) {
        let now = self.clock.now();

        let created_at = match DateTime::parse_from_rfc3339(&event.created_at) {
            Ok(created_at) => created_at.with_timezone(&Utc),
            Err(e) => {
                span.record("parse_error", tracing::field::display(&e));
                warn!(
                    order_id = %event.order_id,
                    created_at_raw = %event.created_at,
                    error = %e,
                    "Failed to parse created_at, using current time"
                );
                ReportMetrics::record_created_at_fallback();
                now
            },
        };

        let report = OrderReport {
            order_id: event.order_id,
            total_price: event.total_price,
            customer_id: event.customer_id,
            product_id: event.product_id,
            created_at,
            processed_at: now,
        };

        let order_id = report.order_id.clone();
        let total_reports = self.store.append(report);
        ReportMetrics::record_stored();

        info!(
            order_id = %order_id,
            created_at = %created_at,
            processed_at = %now,
            total_reports,
            "Order report processed and stored"
        );
    }
}

impl DeliveryHandler for ReportHandler {
    fn handle<'a>(
        &'a self,
        envelope: &'a Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>> {
        Box::pin(async move { self.process(envelope) })
    }
}

/// Wire a [`ReportHandler`] into a delivery consumer on `topic`.
///
/// # Errors
///
/// Returns [`ConsumerError`] if the consumer cannot be built.
pub fn report_consumer(
    topic: impl Into<String>,
    bus: Arc<dyn MessageBus>,
    carrier: Arc<dyn TraceCarrier>,
    handler: ReportHandler,
    shutdown: broadcast::Receiver<()>,
) -> Result<DeliveryConsumer, ConsumerError> {
    DeliveryConsumer::builder()
        .name(CONSUMER_NAME)
        .span_name(DELIVERY_SPAN_NAME)
        .topic(topic)
        .bus(bus)
        .carrier(carrier)
        .handler(Arc::new(handler))
        .shutdown(shutdown)
        .build()
}
