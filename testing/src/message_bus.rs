//! In-memory message bus with durable-queue semantics.
//!
//! Complements the production Redpanda bus with a fast, deterministic
//! implementation of the same [`MessageBus`] contract:
//!
//! - every topic is a queue that outlives its subscribers
//! - subscribers on the same topic compete for envelopes
//! - an envelope handed out is *in flight* until settled
//! - ack removes it for good, nack (or drop) requeues it at the front after
//!   the redelivery delay, discard drops it without requeueing
//! - [`InMemoryMessageBus::close`] ends every subscription stream
//!
//! Failure injection covers the two bus-side error paths the pipeline handles:
//! publish refusal and subscription refusal.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks in test code

use order_pipeline_core::envelope::Envelope;
use order_pipeline_core::message_bus::{
    AckState, Acknowledger, BusError, Delivery, MessageBus, Subscription,
};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Default delay before a rejected envelope becomes deliverable again.
pub const DEFAULT_REDELIVERY_DELAY: Duration = Duration::from_millis(10);

struct Queued {
    envelope: Envelope,
    attempt: u32,
}

#[derive(Default)]
struct TopicQueue {
    ready: VecDeque<Queued>,
    in_flight: HashMap<u64, Queued>,
    published: Vec<Envelope>,
    next_tag: u64,
    notify: Arc<Notify>,
}

struct Inner {
    topics: Mutex<HashMap<String, TopicQueue>>,
    redelivery_delay: Duration,
    publish_failure: Mutex<Option<String>>,
    subscribe_failure: Mutex<Option<String>>,
    publish_attempts: AtomicUsize,
    acked: AtomicUsize,
    nacked: AtomicUsize,
    discarded: AtomicUsize,
    closed: AtomicBool,
}

impl Inner {
    fn notify_handle(&self, topic: &str) -> Arc<Notify> {
        let mut topics = self.topics.lock().unwrap();
        Arc::clone(&topics.entry(topic.to_string()).or_default().notify)
    }

    fn take_next(&self, topic: &str) -> Option<(u64, Envelope, u32)> {
        let mut topics = self.topics.lock().unwrap();
        let queue = topics.entry(topic.to_string()).or_default();
        let queued = queue.ready.pop_front()?;
        let tag = queue.next_tag;
        queue.next_tag += 1;
        let envelope = queued.envelope.clone();
        let attempt = queued.attempt;
        queue.in_flight.insert(tag, queued);
        Some((tag, envelope, attempt))
    }

    fn settle(inner: &Arc<Self>, topic: &str, tag: u64, outcome: AckState) {
        let removed = {
            let mut topics = inner.topics.lock().unwrap();
            topics
                .get_mut(topic)
                .and_then(|queue| queue.in_flight.remove(&tag))
        };
        let Some(mut queued) = removed else {
            return;
        };

        match outcome {
            AckState::Acked => {
                inner.acked.fetch_add(1, Ordering::SeqCst);
            },
            AckState::Discarded => {
                inner.discarded.fetch_add(1, Ordering::SeqCst);
            },
            AckState::Nacked | AckState::Pending => {
                inner.nacked.fetch_add(1, Ordering::SeqCst);
                queued.attempt += 1;
                let delay = inner.redelivery_delay;
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) if !delay.is_zero() => {
                        let inner = Arc::clone(inner);
                        let topic = topic.to_string();
                        handle.spawn(async move {
                            tokio::time::sleep(delay).await;
                            inner.requeue(&topic, queued);
                        });
                    },
                    _ => inner.requeue(topic, queued),
                }
            },
        }
    }

    fn requeue(&self, topic: &str, queued: Queued) {
        let notify = {
            let mut topics = self.topics.lock().unwrap();
            let queue = topics.entry(topic.to_string()).or_default();
            queue.ready.push_front(queued);
            Arc::clone(&queue.notify)
        };
        notify.notify_waiters();
    }
}

struct InMemoryAcker {
    inner: Arc<Inner>,
    topic: String,
    tag: u64,
}

impl Acknowledger for InMemoryAcker {
    fn settle(self: Box<Self>, outcome: AckState) {
        Inner::settle(&self.inner, &self.topic, self.tag, outcome);
    }
}

/// In-memory message bus for fast, deterministic testing.
///
/// Cloning is cheap and every clone shares the same queues, so one clone can
/// be handed to a producer and another to a consumer.
///
/// # Example
///
/// ```
/// use order_pipeline_testing::InMemoryMessageBus;
/// use order_pipeline_core::{Envelope, MessageBus};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryMessageBus::new();
/// bus.publish("orders", &Envelope::new(b"{}".to_vec())).await?;
///
/// let mut subscription = bus.subscribe("orders").await?;
/// if let Some(Ok(delivery)) = subscription.next().await {
///     delivery.ack();
/// }
/// assert_eq!(bus.acked_count(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryMessageBus {
    inner: Arc<Inner>,
}

impl InMemoryMessageBus {
    /// Create a bus with the default redelivery delay.
    #[must_use]
    pub fn new() -> Self {
        Self::with_redelivery_delay(DEFAULT_REDELIVERY_DELAY)
    }

    /// Create a bus that requeues rejected envelopes after `delay`.
    ///
    /// A zero delay requeues immediately.
    #[must_use]
    pub fn with_redelivery_delay(delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                redelivery_delay: delay,
                publish_failure: Mutex::new(None),
                subscribe_failure: Mutex::new(None),
                publish_attempts: AtomicUsize::new(0),
                acked: AtomicUsize::new(0),
                nacked: AtomicUsize::new(0),
                discarded: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Make every subsequent publish fail with `reason` (`None` restores success).
    pub fn fail_publishes(&self, reason: Option<&str>) {
        *self.inner.publish_failure.lock().unwrap() = reason.map(str::to_string);
    }

    /// Make every subsequent subscribe fail with `reason` (`None` restores success).
    pub fn fail_subscriptions(&self, reason: Option<&str>) {
        *self.inner.subscribe_failure.lock().unwrap() = reason.map(str::to_string);
    }

    /// End every open and future subscription stream.
    ///
    /// Queued envelopes stay queued; subscribers just stop receiving them.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let topics = self.inner.topics.lock().unwrap();
        for queue in topics.values() {
            queue.notify.notify_waiters();
        }
    }

    /// Number of publish calls, successful or not.
    #[must_use]
    pub fn publish_attempts(&self) -> usize {
        self.inner.publish_attempts.load(Ordering::SeqCst)
    }

    /// Every envelope accepted on `topic`, in publish order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<Envelope> {
        self.inner
            .topics
            .lock()
            .unwrap()
            .get(topic)
            .map(|queue| queue.published.clone())
            .unwrap_or_default()
    }

    /// Envelopes waiting for delivery on `topic`.
    #[must_use]
    pub fn pending(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .unwrap()
            .get(topic)
            .map_or(0, |queue| queue.ready.len())
    }

    /// Envelopes delivered on `topic` but not yet settled.
    #[must_use]
    pub fn in_flight(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .unwrap()
            .get(topic)
            .map_or(0, |queue| queue.in_flight.len())
    }

    /// Total acknowledgements across all topics.
    #[must_use]
    pub fn acked_count(&self) -> usize {
        self.inner.acked.load(Ordering::SeqCst)
    }

    /// Total rejections across all topics.
    #[must_use]
    pub fn nacked_count(&self) -> usize {
        self.inner.nacked.load(Ordering::SeqCst)
    }

    /// Total envelopes dropped without redelivery across all topics.
    #[must_use]
    pub fn discarded_count(&self) -> usize {
        self.inner.discarded.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for InMemoryMessageBus {
    fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let topic = topic.to_string();
        let envelope = envelope.clone();

        Box::pin(async move {
            self.inner.publish_attempts.fetch_add(1, Ordering::SeqCst);

            if let Some(reason) = self.inner.publish_failure.lock().unwrap().clone() {
                return Err(BusError::PublishFailed { topic, reason });
            }

            let notify = {
                let mut topics = self.inner.topics.lock().unwrap();
                let queue = topics.entry(topic.clone()).or_default();
                queue.published.push(envelope.clone());
                queue.ready.push_back(Queued {
                    envelope,
                    attempt: 1,
                });
                Arc::clone(&queue.notify)
            };
            notify.notify_waiters();

            tracing::trace!(topic = %topic, "Envelope published to in-memory bus");
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription, BusError>> + Send + '_>> {
        let topic = topic.to_string();
        let inner = Arc::clone(&self.inner);

        Box::pin(async move {
            if let Some(reason) = inner.subscribe_failure.lock().unwrap().clone() {
                return Err(BusError::SubscriptionFailed { topic, reason });
            }

            let notify = inner.notify_handle(&topic);

            let stream = async_stream::stream! {
                loop {
                    // Register interest before checking the queue so a publish
                    // or close between the check and the await is not missed.
                    let notified = notify.notified();
                    if inner.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    match inner.take_next(&topic) {
                        Some((tag, envelope, attempt)) => {
                            let acker = InMemoryAcker {
                                inner: Arc::clone(&inner),
                                topic: topic.clone(),
                                tag,
                            };
                            yield Ok(Delivery::new(envelope, attempt, Box::new(acker)));
                        },
                        None => notified.await,
                    }
                }
            };

            Ok(Box::pin(stream) as Subscription)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn publish_then_subscribe_delivers() {
        let bus = InMemoryMessageBus::new();
        let envelope = Envelope::new(b"one".to_vec());
        bus.publish("orders", &envelope).await.unwrap();

        let mut subscription = bus.subscribe("orders").await.unwrap();
        let delivery = subscription.next().await.unwrap().unwrap();

        assert_eq!(delivery.envelope(), &envelope);
        assert_eq!(delivery.attempt(), 1);
        assert_eq!(bus.in_flight("orders"), 1);

        delivery.ack();
        assert_eq!(bus.in_flight("orders"), 0);
        assert_eq!(bus.pending("orders"), 0);
        assert_eq!(bus.acked_count(), 1);
    }

    #[tokio::test]
    async fn subscriber_waits_for_later_publish() {
        let bus = InMemoryMessageBus::new();
        let mut subscription = bus.subscribe("orders").await.unwrap();

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher
                .publish("orders", &Envelope::new(b"late".to_vec()))
                .await
                .unwrap();
        });

        let delivery = tokio::time::timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.envelope().payload(), b"late");
        delivery.ack();
    }

    #[tokio::test]
    async fn nack_redelivers_with_incremented_attempt() {
        let bus = InMemoryMessageBus::with_redelivery_delay(Duration::ZERO);
        bus.publish("orders", &Envelope::new(b"retry".to_vec()))
            .await
            .unwrap();

        let mut subscription = bus.subscribe("orders").await.unwrap();
        let first = subscription.next().await.unwrap().unwrap();
        let id = first.envelope().id().to_string();
        first.nack();

        let second = subscription.next().await.unwrap().unwrap();
        assert_eq!(second.envelope().id(), id);
        assert_eq!(second.attempt(), 2);
        second.ack();

        assert_eq!(bus.nacked_count(), 1);
        assert_eq!(bus.acked_count(), 1);
    }

    #[tokio::test]
    async fn dropped_subscription_leaves_unsettled_work_redeliverable() {
        let bus = InMemoryMessageBus::with_redelivery_delay(Duration::ZERO);
        bus.publish("orders", &Envelope::new(b"a".to_vec()))
            .await
            .unwrap();
        bus.publish("orders", &Envelope::new(b"b".to_vec()))
            .await
            .unwrap();

        let mut subscription = bus.subscribe("orders").await.unwrap();
        let in_flight = subscription.next().await.unwrap().unwrap();
        drop(subscription);
        drop(in_flight);

        assert_eq!(bus.in_flight("orders"), 0);
        assert_eq!(bus.pending("orders"), 2);

        let mut resumed = bus.subscribe("orders").await.unwrap();
        let redelivered = resumed.next().await.unwrap().unwrap();
        assert_eq!(redelivered.envelope().payload(), b"a");
        redelivered.ack();
    }

    #[tokio::test]
    async fn discard_drops_envelope_for_good() {
        let bus = InMemoryMessageBus::with_redelivery_delay(Duration::ZERO);
        bus.publish("orders", &Envelope::new(b"poison".to_vec()))
            .await
            .unwrap();

        let mut subscription = bus.subscribe("orders").await.unwrap();
        subscription.next().await.unwrap().unwrap().discard();

        assert_eq!(bus.discarded_count(), 1);
        assert_eq!(bus.nacked_count(), 0);
        assert_eq!(bus.pending("orders"), 0);
        assert_eq!(bus.in_flight("orders"), 0);
    }

    #[tokio::test]
    async fn close_ends_waiting_subscription() {
        let bus = InMemoryMessageBus::new();
        let mut subscription = bus.subscribe("orders").await.unwrap();

        let closer = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close();
        });

        let next = tokio::time::timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap();
        assert!(next.is_none());
        assert!(bus.subscribe("orders").await.unwrap().next().await.is_none());
    }

    #[tokio::test]
    async fn publish_failure_is_reported_and_counted() {
        let bus = InMemoryMessageBus::new();
        bus.fail_publishes(Some("broker unreachable"));

        let result = bus.publish("orders", &Envelope::new(vec![])).await;

        assert!(matches!(result, Err(BusError::PublishFailed { ref reason, .. }) if reason == "broker unreachable"));
        assert_eq!(bus.publish_attempts(), 1);
        assert!(bus.published("orders").is_empty());
    }

    #[tokio::test]
    async fn subscribe_failure_is_reported() {
        let bus = InMemoryMessageBus::new();
        bus.fail_subscriptions(Some("no such queue"));

        let result = bus.subscribe("orders").await;
        assert!(matches!(result, Err(BusError::SubscriptionFailed { .. })));
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = InMemoryMessageBus::new();
        bus.publish("orders", &Envelope::new(vec![1])).await.unwrap();
        bus.publish("payments", &Envelope::new(vec![2])).await.unwrap();

        assert_eq!(bus.published("orders").len(), 1);
        assert_eq!(bus.published("payments").len(), 1);
        assert_eq!(bus.pending("orders"), 1);
    }
}
