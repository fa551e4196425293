//! Message bus abstraction for durable publish/subscribe over named topics.
//!
//! This module provides the [`MessageBus`] trait used by the producing side to
//! publish [`Envelope`]s and by the consuming side to pull [`Delivery`] values
//! from a long-lived [`Subscription`].
//!
//! # Delivery Semantics
//!
//! - **At-least-once**: an envelope stays on the bus until it is acknowledged
//! - **Explicit settlement**: every delivery is acknowledged (removed for good),
//!   rejected (eligible for redelivery, immediately or after a bus-defined delay)
//!   or discarded (rejected for good once the consumer gives up on it)
//! - **Settled at most once**: [`Delivery::ack`], [`Delivery::nack`] and
//!   [`Delivery::discard`] consume the delivery
//! - **Drop rejects**: a delivery dropped while still pending is rejected, so
//!   cancelling a consumer never loses in-flight work
//!
//! # Lifecycle of a delivery
//!
//! ```text
//!                  ┌──── ack ────────► Acked     (terminal)
//! received ─► Pending ── discard ────► Discarded (terminal)
//!                  └──── nack / drop ──► Nacked    (redeliverable)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//!
//! bus.publish("orders", &Envelope::new(payload)).await?;
//!
//! let mut subscription = bus.subscribe("orders").await?;
//! while let Some(result) = subscription.next().await {
//!     let delivery = result?;
//!     match process(delivery.envelope()) {
//!         Ok(()) => delivery.ack(),
//!         Err(_) => delivery.nack(),
//!     }
//! }
//! ```

use crate::envelope::Envelope;
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during message bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Failed to connect to the bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an envelope to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to a topic
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// The topic that failed to subscribe
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error while receiving
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Settlement state of a delivered envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    /// Delivered, not yet settled
    Pending,
    /// Acknowledged: removed from redelivery permanently
    Acked,
    /// Rejected: eligible for redelivery
    Nacked,
    /// Rejected without redelivery: the bus moves past it
    Discarded,
}

impl fmt::Display for AckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Acked => write!(f, "acked"),
            Self::Nacked => write!(f, "nacked"),
            Self::Discarded => write!(f, "discarded"),
        }
    }
}

/// Bus-specific half of the settlement protocol.
///
/// Each bus implementation hands one acknowledger to every [`Delivery`]. It is
/// invoked exactly once with [`AckState::Acked`], [`AckState::Nacked`] or
/// [`AckState::Discarded`].
pub trait Acknowledger: Send {
    /// Report the final settlement of the delivery to the bus.
    fn settle(self: Box<Self>, outcome: AckState);
}

/// An envelope handed to a subscriber, together with its settlement handle.
///
/// The subscriber borrows the envelope for the duration of one handling call
/// and then settles the delivery. Settling consumes the value, which makes a
/// second acknowledgement unrepresentable.
pub struct Delivery {
    envelope: Envelope,
    attempt: u32,
    acker: Option<Box<dyn Acknowledger>>,
}

impl Delivery {
    /// Wrap an envelope with the acknowledger that reports its settlement.
    ///
    /// `attempt` starts at 1 and grows with each redelivery when the bus tracks it.
    #[must_use]
    pub fn new(envelope: Envelope, attempt: u32, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            envelope,
            attempt,
            acker: Some(acker),
        }
    }

    /// The delivered envelope.
    #[must_use]
    pub const fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Delivery attempt number as reported by the bus (1 for a first delivery).
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Acknowledge the envelope, removing it from redelivery permanently.
    pub fn ack(mut self) {
        self.settle(AckState::Acked);
    }

    /// Reject the envelope so the bus can redeliver it.
    pub fn nack(mut self) {
        self.settle(AckState::Nacked);
    }

    /// Reject the envelope for good. The bus never redelivers it.
    pub fn discard(mut self) {
        self.settle(AckState::Discarded);
    }

    fn settle(&mut self, outcome: AckState) {
        if let Some(acker) = self.acker.take() {
            acker.settle(outcome);
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if self.acker.is_some() {
            tracing::debug!(
                message_id = %self.envelope.id(),
                "Delivery dropped without settlement, rejecting for redelivery"
            );
            self.settle(AckState::Nacked);
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("envelope", &self.envelope)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// Lazy, potentially infinite stream of deliveries from one topic.
///
/// Dropping the stream closes the subscription: no further envelopes are
/// delivered and unsettled ones become redeliverable.
pub type Subscription = Pin<Box<dyn Stream<Item = Result<Delivery, BusError>> + Send>>;

/// Trait for message bus implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: `publish` is invoked concurrently from
/// every in-flight producer request.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so the bus can be shared as
/// `Arc<dyn MessageBus>` and injected into producers and consumers.
pub trait MessageBus: Send + Sync {
    /// Publish an envelope to a topic.
    ///
    /// Completes once the bus has accepted the envelope or refused it. No retry
    /// is attempted here; retry policy belongs to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] if the bus is unreachable or refuses the envelope.
    fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;

    /// Subscribe to a topic and receive a stream of deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the subscription cannot be established.
    fn subscribe(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription, BusError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingAcker(Arc<Mutex<Vec<AckState>>>);

    impl Acknowledger for RecordingAcker {
        fn settle(self: Box<Self>, outcome: AckState) {
            if let Ok(mut outcomes) = self.0.lock() {
                outcomes.push(outcome);
            }
        }
    }

    fn delivery(outcomes: &Arc<Mutex<Vec<AckState>>>) -> Delivery {
        Delivery::new(
            Envelope::new(vec![1, 2, 3]),
            1,
            Box::new(RecordingAcker(Arc::clone(outcomes))),
        )
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn ack_settles_once() {
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        delivery(&outcomes).ack();
        assert_eq!(*outcomes.lock().unwrap(), vec![AckState::Acked]);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn nack_settles_once() {
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        delivery(&outcomes).nack();
        assert_eq!(*outcomes.lock().unwrap(), vec![AckState::Nacked]);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn discard_settles_once_without_requeue() {
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        delivery(&outcomes).discard();
        assert_eq!(*outcomes.lock().unwrap(), vec![AckState::Discarded]);
        assert_eq!(AckState::Discarded.to_string(), "discarded");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn dropping_pending_delivery_rejects_it() {
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        drop(delivery(&outcomes));
        assert_eq!(*outcomes.lock().unwrap(), vec![AckState::Nacked]);
    }

    #[test]
    fn bus_error_display() {
        let err = BusError::PublishFailed {
            topic: "orders".to_string(),
            reason: "broker down".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Publish failed for topic 'orders': broker down"
        );
    }
}
