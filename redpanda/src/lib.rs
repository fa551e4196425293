//! Redpanda message bus for the order pipeline.
//!
//! This crate implements the [`MessageBus`] trait from `order-pipeline-core`
//! over rdkafka, so it works against Redpanda or any Kafka-compatible broker.
//!
//! # Wire Format
//!
//! | Envelope        | Kafka record                         |
//! |-----------------|--------------------------------------|
//! | `id`            | record key and `message_id` header   |
//! | `payload`       | record value (JSON, untouched)       |
//! | `headers`       | record headers (UTF-8 values)        |
//!
//! Trace propagation keys (`traceparent`, `tracestate`) therefore travel as
//! ordinary Kafka headers.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits. The forwarding task
//! hands out one [`Delivery`] at a time and waits for it to be settled:
//!
//! ```text
//! poll ─► Delivery ─► subscriber ─┬─ ack     ─► commit offset              ─► poll next
//!                                 ├─ discard ─► commit offset (logged)     ─► poll next
//!                                 └─ nack    ─► backoff ─► seek back       ─► same message again
//! ```
//!
//! - The nack backoff doubles with every attempt on the same offset, capped
//!   at 5 seconds; the consumer decides when to stop retrying and discard
//! - If the subscriber drops the stream, the task exits without committing
//! - If the process crashes before commit, the message is redelivered
//! - Ordering is only guaranteed within a partition
//!
//! # Example
//!
//! ```no_run
//! use order_pipeline_redpanda::RedpandaMessageBus;
//! use order_pipeline_core::{Envelope, MessageBus};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaMessageBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("report-service")
//!     .auto_offset_reset("earliest")
//!     .build()?;
//!
//! bus.publish("orders", &Envelope::new(br#"{"orderID":"o-1"}"#.to_vec())).await?;
//!
//! let mut subscription = bus.subscribe("orders").await?;
//! while let Some(result) = subscription.next().await {
//!     match result {
//!         Ok(delivery) => delivery.ack(),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use order_pipeline_core::envelope::{Envelope, Headers};
use order_pipeline_core::message_bus::{
    AckState, Acknowledger, BusError, Delivery, MessageBus, Subscription,
};
use rdkafka::Offset;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers as _, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Kafka header carrying the envelope id.
pub const MESSAGE_ID_HEADER: &str = "message_id";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_BUFFER_SIZE: usize = 16;
const DEFAULT_OFFSET_RESET: &str = "latest";
const DEFAULT_REDELIVERY_BACKOFF: Duration = Duration::from_millis(100);
const MAX_REDELIVERY_BACKOFF: Duration = Duration::from_secs(5);

/// Redpanda message bus implementation.
///
/// # Configuration
///
/// - **Broker addresses**: Bootstrap servers (required)
/// - **Producer settings**: Acks, compression, timeout
/// - **Consumer group**: Explicit ID or derived from the topic
/// - **Buffer size**: Capacity of the forwarding channel (default: 16)
/// - **Offset reset**: Where new groups start reading (default: "latest")
/// - **Redelivery backoff**: First wait before a nacked message is redelivered
///   (default: 100ms, doubling per attempt)
///
/// # Example
///
/// ```no_run
/// use order_pipeline_redpanda::RedpandaMessageBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// // Basic configuration
/// let bus = RedpandaMessageBus::new("localhost:9092")?;
///
/// // Custom configuration
/// let bus = RedpandaMessageBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")  // Wait for all replicas
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaMessageBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: Option<String>,
    buffer_size: usize,
    auto_offset_reset: String,
    redelivery_backoff: Duration,
}

impl RedpandaMessageBus {
    /// Create a new Redpanda message bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the producer cannot be created
    /// (invalid broker list or configuration).
    pub fn new(brokers: &str) -> Result<Self, BusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the bus.
    #[must_use]
    pub fn builder() -> RedpandaMessageBusBuilder {
        RedpandaMessageBusBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn consumer_group_for(&self, topic: &str) -> String {
        self.consumer_group
            .clone()
            .unwrap_or_else(|| format!("order-pipeline-{topic}"))
    }
}

/// Builder for configuring a [`RedpandaMessageBus`].
#[derive(Default)]
pub struct RedpandaMessageBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
    redelivery_backoff: Option<Duration>,
}

impl RedpandaMessageBusBuilder {
    /// Set the broker addresses.
    ///
    /// # Parameters
    ///
    /// - `brokers`: Comma-separated list of broker addresses (e.g., "localhost:9092")
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode.
    ///
    /// - `acks`: "0" (no acks), "1" (leader ack), "all" (all replicas ack)
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec.
    ///
    /// - `compression`: "none", "gzip", "snappy", "lz4", "zstd"
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set how long a publish waits for the broker's delivery report.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// If not set, the group is `order-pipeline-<topic>`. Instances sharing a
    /// group compete for messages, which is the durable-queue behaviour the
    /// pipeline expects.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the capacity of the channel between the Kafka consumer and the
    /// subscriber.
    ///
    /// A zero value is treated as one.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Set the auto offset reset policy for new consumer groups.
    ///
    /// - `"earliest"`: Start from the beginning of the topic
    /// - `"latest"`: Start from the end (only new messages)
    /// - `"error"`: Fail if no committed offset exists
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the wait before the first redelivery of a nacked message.
    ///
    /// Each further attempt on the same offset doubles it, up to 5 seconds.
    ///
    /// Default: 100ms
    #[must_use]
    pub const fn redelivery_backoff(mut self, backoff: Duration) -> Self {
        self.redelivery_backoff = Some(backoff);
        self
    }

    /// Build the [`RedpandaMessageBus`].
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaMessageBus, BusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| BusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| DEFAULT_OFFSET_RESET.to_string());

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaMessageBus created successfully"
        );

        Ok(RedpandaMessageBus {
            producer,
            brokers,
            timeout,
            consumer_group: self.consumer_group,
            buffer_size,
            auto_offset_reset,
            redelivery_backoff: self.redelivery_backoff.unwrap_or(DEFAULT_REDELIVERY_BACKOFF),
        })
    }
}

/// Kafka record headers for an envelope, including the `message_id` header.
fn record_headers(envelope: &Envelope) -> OwnedHeaders {
    envelope.headers().iter().fold(
        OwnedHeaders::new().insert(Header {
            key: MESSAGE_ID_HEADER,
            value: Some(envelope.id()),
        }),
        |headers, (key, value)| {
            headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_str()),
            })
        },
    )
}

/// Rebuild an envelope from a consumed record.
///
/// The id comes from the `message_id` header, falling back to the record key
/// and finally to a fresh id. Non-UTF-8 header values are skipped.
fn envelope_from_message(message: &BorrowedMessage<'_>) -> Envelope {
    let mut headers = Headers::new();
    if let Some(kafka_headers) = message.headers() {
        for header in kafka_headers.iter() {
            let Some(value) = header.value.and_then(|v| std::str::from_utf8(v).ok()) else {
                continue;
            };
            headers.insert(header.key.to_string(), value.to_string());
        }
    }

    let id = headers.remove(MESSAGE_ID_HEADER).or_else(|| {
        message
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(str::to_string)
    });
    let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();

    let envelope = match id {
        Some(id) => Envelope::with_id(id, payload),
        None => Envelope::new(payload),
    };
    envelope.with_headers(headers)
}

/// Reports a subscriber's settlement back to the forwarding task.
struct KafkaAcker {
    settled: oneshot::Sender<AckState>,
}

impl Acknowledger for KafkaAcker {
    fn settle(self: Box<Self>, outcome: AckState) {
        // The forwarding task may already be gone during shutdown
        let _ = self.settled.send(outcome);
    }
}

impl MessageBus for RedpandaMessageBus {
    fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let topic = topic.to_string();
        let envelope = envelope.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let record = FutureRecord::to(&topic)
                .key(envelope.id())
                .payload(envelope.payload())
                .headers(record_headers(&envelope));

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        message_id = %envelope.id(),
                        "Envelope published successfully"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        message_id = %envelope.id(),
                        error = %kafka_error,
                        "Failed to publish envelope"
                    );
                    Err(BusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription, BusError>> + Send + '_>> {
        let topic = topic.to_string();
        let consumer_group = self.consumer_group_for(&topic);
        let brokers = self.brokers.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();
        let timeout = self.timeout;
        let redelivery_backoff = self.redelivery_backoff;

        Box::pin(async move {
            // Manual commit: the offset only advances on ack
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| BusError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[topic.as_str()])
                .map_err(|e| BusError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: format!("Failed to subscribe to topic: {e}"),
                })?;

            tracing::info!(
                topic = %topic,
                consumer_group = %consumer_group,
                buffer_size,
                auto_offset_reset = %auto_offset_reset,
                manual_commit = true,
                "Subscribed to topic"
            );

            let (tx, rx) = mpsc::channel(buffer_size);
            tokio::spawn(forward_deliveries(consumer, tx, timeout, redelivery_backoff));

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as Subscription)
        })
    }
}

/// Wait before redelivering attempt `attempt` of a nacked message.
fn redelivery_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1 << exponent).min(MAX_REDELIVERY_BACKOFF)
}

/// Own the consumer, hand out one delivery at a time and apply its settlement.
async fn forward_deliveries(
    consumer: StreamConsumer,
    tx: mpsc::Sender<Result<Delivery, BusError>>,
    seek_timeout: Duration,
    redelivery_backoff: Duration,
) {
    use futures::StreamExt;

    let mut attempts: HashMap<(i32, i64), u32> = HashMap::new();
    let mut stream = consumer.stream();

    while let Some(msg_result) = stream.next().await {
        let message = match msg_result {
            Ok(message) => message,
            Err(e) => {
                let err = BusError::TransportError(format!("Failed to receive message: {e}"));
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
                continue;
            },
        };

        let position = (message.partition(), message.offset());
        let attempt = {
            let count = attempts.entry(position).or_insert(0);
            *count += 1;
            *count
        };

        let envelope = envelope_from_message(&message);
        tracing::trace!(
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            message_id = %envelope.id(),
            attempt,
            "Received message"
        );

        let (settled_tx, settled_rx) = oneshot::channel();
        let delivery = Delivery::new(envelope, attempt, Box::new(KafkaAcker { settled: settled_tx }));
        if tx.send(Ok(delivery)).await.is_err() {
            tracing::debug!("Subscription dropped, exiting consumer task");
            break;
        }

        // A dropped sender means the delivery was dropped unsettled
        let outcome = settled_rx.await.unwrap_or(AckState::Nacked);
        match outcome {
            AckState::Acked | AckState::Discarded => {
                attempts.remove(&position);
                if outcome == AckState::Discarded {
                    tracing::error!(
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        attempt,
                        "Message discarded, committing past it"
                    );
                }
                if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                    tracing::warn!(
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        error = %e,
                        "Failed to commit offset (message may be redelivered)"
                    );
                }
            },
            AckState::Nacked | AckState::Pending => {
                tokio::select! {
                    () = tokio::time::sleep(redelivery_delay(redelivery_backoff, attempt)) => {},
                    () = tx.closed() => break,
                }
                if let Err(e) = consumer.seek(
                    message.topic(),
                    message.partition(),
                    Offset::Offset(message.offset()),
                    seek_timeout,
                ) {
                    tracing::warn!(
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        error = %e,
                        "Failed to seek back after nack (message redelivered after restart)"
                    );
                }
            },
        }
    }

    tracing::debug!("Consumer task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_message_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaMessageBus>();
        assert_sync::<RedpandaMessageBus>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let result = RedpandaMessageBus::builder().build();
        assert!(matches!(result, Err(BusError::ConnectionFailed(_))));
    }

    #[test]
    fn record_headers_carry_message_id_and_envelope_headers() {
        let envelope = Envelope::with_id("m-1", vec![])
            .with_header("traceparent", "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01");
        let headers = record_headers(&envelope);

        let collected: HashMap<&str, Option<&[u8]>> =
            headers.iter().map(|h| (h.key, h.value)).collect();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[MESSAGE_ID_HEADER], Some(b"m-1".as_slice()));
        assert!(collected.contains_key("traceparent"));
    }

    #[test]
    fn redelivery_delay_doubles_up_to_cap() {
        let base = Duration::from_millis(100);
        assert_eq!(redelivery_delay(base, 1), Duration::from_millis(100));
        assert_eq!(redelivery_delay(base, 2), Duration::from_millis(200));
        assert_eq!(redelivery_delay(base, 4), Duration::from_millis(800));
        assert_eq!(redelivery_delay(base, 10), MAX_REDELIVERY_BACKOFF);
        assert_eq!(redelivery_delay(base, u32::MAX), MAX_REDELIVERY_BACKOFF);
        assert_eq!(redelivery_delay(Duration::ZERO, 3), Duration::ZERO);
    }

    #[test]
    fn zero_buffer_size_is_clamped() {
        let builder = RedpandaMessageBus::builder().buffer_size(0);
        assert_eq!(builder.buffer_size, Some(1));
    }
}
