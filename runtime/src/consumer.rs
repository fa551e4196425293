//! Delivery consumer: the long-running subscribe-process-settle loop.
//!
//! `DeliveryConsumer` owns the boilerplate every bus consumer needs so that
//! application code only implements [`DeliveryHandler`]:
//!
//! ```text
//! subscribe(topic)            (once; failure is fatal to startup)
//! loop {
//!     select! {
//!         shutdown  => drop subscription, exit
//!         delivery  =>
//!             extract trace context from headers
//!             span "process_delivery" (child of remote parent, exported
//!                  under the configured span name)
//!             handler.handle(envelope)
//!                 Ok                          => ack
//!                 Err / panic                 => nack
//!                 Err / panic, last attempt   => discard
//!             yield to the scheduler
//!         stream end => exit
//!     }
//! }
//! ```
//!
//! Deliveries are processed strictly one at a time: the next envelope is not
//! pulled until the current one is settled. A delivery that keeps failing is
//! discarded once its attempt number reaches `max_attempts`, so one poison
//! message cannot hold back the rest of the topic.
//!
//! # Example
//!
//! ```rust,ignore
//! let consumer = DeliveryConsumer::builder()
//!     .name("report-service")
//!     .topic("orders")
//!     .bus(bus)
//!     .carrier(carrier)
//!     .handler(handler)
//!     .span_name("process_order_created_event")
//!     .max_attempts(5)
//!     .shutdown(shutdown_rx)
//!     .build()?;
//!
//! let handle = consumer.start().await?;
//! ```

use crate::metrics::BusMetrics;
use futures::{FutureExt, StreamExt};
use order_pipeline_core::envelope::{EVENT_TYPE_HEADER, Envelope};
use order_pipeline_core::message_bus::{BusError, Delivery, MessageBus, Subscription};
use order_pipeline_core::propagation::{NoopTraceCarrier, TraceCarrier};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{Instrument, debug, error, info, warn};

/// Span name used when the builder is not given one.
pub const DEFAULT_SPAN_NAME: &str = "process_delivery";

/// Attempts a delivery gets before it is discarded.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Error returned by a [`DeliveryHandler`].
///
/// Every variant leads to the delivery being rejected (or discarded on its
/// last attempt); the distinction is kept for logs.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The payload could not be decoded into the expected event
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// The event was decoded but could not be processed
    #[error("Processing failed: {0}")]
    Processing(String),
}

/// Errors that prevent a consumer from starting.
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// A required builder field was not provided
    #[error("Consumer is missing required field: {0}")]
    MissingField(&'static str),

    /// The initial subscription could not be established
    #[error(transparent)]
    Subscribe(#[from] BusError),
}

/// Why a consumer loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerExit {
    /// Shutdown was signalled
    Shutdown,
    /// The bus closed the subscription
    StreamEnded,
}

/// Application logic plugged into a [`DeliveryConsumer`].
///
/// The handler runs inside the delivery span, so anything it logs is
/// correlated with the producing request's trace. Returning `Ok` acknowledges
/// the envelope; returning `Err` (or panicking) rejects it for redelivery
/// until the consumer's attempt limit is reached.
pub trait DeliveryHandler: Send + Sync + 'static {
    /// Handle one envelope.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] when the envelope should be rejected.
    fn handle<'a>(
        &'a self,
        envelope: &'a Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;
}

/// Single-topic, sequential bus consumer.
pub struct DeliveryConsumer {
    name: String,
    topic: String,
    span_name: String,
    max_attempts: u32,
    bus: Arc<dyn MessageBus>,
    carrier: Arc<dyn TraceCarrier>,
    handler: Arc<dyn DeliveryHandler>,
    shutdown: broadcast::Receiver<()>,
}

impl DeliveryConsumer {
    /// Create a builder for configuring a consumer.
    #[must_use]
    pub fn builder() -> DeliveryConsumerBuilder {
        DeliveryConsumerBuilder::default()
    }

    /// Consumer name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exported name of the per-delivery span.
    #[must_use]
    pub fn span_name(&self) -> &str {
        &self.span_name
    }

    /// Subscribe and spawn the loop as a background task.
    ///
    /// The subscription is established before this returns, so envelopes
    /// published afterwards are guaranteed to reach this consumer.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Subscribe`] if the bus refuses the
    /// subscription; nothing is spawned in that case.
    pub async fn start(self) -> Result<tokio::task::JoinHandle<ConsumerExit>, ConsumerError> {
        let subscription = match self.bus.subscribe(&self.topic).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(consumer = %self.name, topic = %self.topic, error = %e, "Failed to subscribe");
                return Err(e.into());
            },
        };
        info!(consumer = %self.name, topic = %self.topic, "Subscribed to message bus");

        Ok(tokio::spawn(self.run(subscription)))
    }

    async fn run(mut self, mut subscription: Subscription) -> ConsumerExit {
        info!(consumer = %self.name, "Delivery consumer started");

        let exit = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Delivery consumer received shutdown signal");
                    break ConsumerExit::Shutdown;
                }
                next = subscription.next() => {
                    match next {
                        Some(Ok(delivery)) => {
                            self.process(delivery).await;
                            // Redelivery can be immediate; let other tasks run
                            tokio::task::yield_now().await;
                        },
                        Some(Err(e)) => {
                            error!(consumer = %self.name, error = %e, "Error receiving delivery from stream");
                        },
                        None => {
                            warn!(consumer = %self.name, topic = %self.topic, "Delivery stream ended");
                            break ConsumerExit::StreamEnded;
                        },
                    }
                }
            }
        };

        // Closing the subscription makes anything unsettled redeliverable
        drop(subscription);
        info!(consumer = %self.name, ?exit, "Delivery consumer stopped");
        exit
    }

    async fn process(&self, delivery: Delivery) {
        let started = Instant::now();
        let envelope = delivery.envelope();

        let span = tracing::info_span!(
            "process_delivery",
            "otel.name" = self.span_name.as_str(),
            consumer = %self.name,
            "message.id" = %envelope.id(),
            "event.type" = envelope.header(EVENT_TYPE_HEADER).unwrap_or("unknown"),
            attempt = delivery.attempt(),
            outcome = tracing::field::Empty,
        );

        match self.carrier.extract(envelope.headers()) {
            Some(parent) => {
                self.carrier.attach(&span, &parent);
                debug!(parent: &span, trace_id = %parent.trace_id, "Continuing remote trace");
            },
            None => debug!(parent: &span, "No trace context in headers, starting new trace"),
        }

        let result = AssertUnwindSafe(self.handler.handle(envelope))
            .catch_unwind()
            .instrument(span.clone())
            .await;

        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => {
                error!(parent: &span, "Handler panicked");
                Some("handler panicked".to_string())
            },
        };

        let Some(reason) = failure else {
            span.record("outcome", "acked");
            delivery.ack();
            BusMetrics::record_ack(started.elapsed());
            return;
        };

        if delivery.attempt() >= self.max_attempts {
            span.record("outcome", "discarded");
            error!(
                parent: &span,
                error = %reason,
                max_attempts = self.max_attempts,
                "Delivery failed on its last attempt, discarding"
            );
            delivery.discard();
            BusMetrics::record_discard(started.elapsed());
        } else {
            span.record("outcome", "nacked");
            warn!(parent: &span, error = %reason, "Delivery rejected");
            delivery.nack();
            BusMetrics::record_nack(started.elapsed());
        }
    }
}

/// Builder for configuring a [`DeliveryConsumer`].
#[derive(Default)]
pub struct DeliveryConsumerBuilder {
    name: Option<String>,
    topic: Option<String>,
    span_name: Option<String>,
    max_attempts: Option<u32>,
    bus: Option<Arc<dyn MessageBus>>,
    carrier: Option<Arc<dyn TraceCarrier>>,
    handler: Option<Arc<dyn DeliveryHandler>>,
    shutdown: Option<broadcast::Receiver<()>>,
}

impl DeliveryConsumerBuilder {
    /// Set consumer name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the topic to subscribe to.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the name the delivery span is exported under
    /// (default: [`DEFAULT_SPAN_NAME`]).
    #[must_use]
    pub fn span_name(mut self, span_name: impl Into<String>) -> Self {
        self.span_name = Some(span_name.into());
        self
    }

    /// Set how many attempts a delivery gets before it is discarded
    /// (default: [`DEFAULT_MAX_ATTEMPTS`], minimum 1).
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// Set the message bus.
    #[must_use]
    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Set the trace carrier (default: [`NoopTraceCarrier`]).
    #[must_use]
    pub fn carrier(mut self, carrier: Arc<dyn TraceCarrier>) -> Self {
        self.carrier = Some(carrier);
        self
    }

    /// Set the delivery handler.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn DeliveryHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Set shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Build the [`DeliveryConsumer`].
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::MissingField`] if name, topic, bus, handler or
    /// shutdown were not set.
    pub fn build(self) -> Result<DeliveryConsumer, ConsumerError> {
        Ok(DeliveryConsumer {
            name: self.name.ok_or(ConsumerError::MissingField("name"))?,
            topic: self.topic.ok_or(ConsumerError::MissingField("topic"))?,
            span_name: self
                .span_name
                .unwrap_or_else(|| DEFAULT_SPAN_NAME.to_string()),
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            bus: self.bus.ok_or(ConsumerError::MissingField("bus"))?,
            carrier: self
                .carrier
                .unwrap_or_else(|| Arc::new(NoopTraceCarrier)),
            handler: self.handler.ok_or(ConsumerError::MissingField("handler"))?,
            shutdown: self.shutdown.ok_or(ConsumerError::MissingField("shutdown"))?,
        })
    }
}
