//! # Order Pipeline Core
//!
//! Core traits and types for the asynchronous order event pipeline.
//!
//! A producing service validates a request, serializes a domain event into an
//! [`Envelope`](envelope::Envelope), tags it with the caller's trace context and
//! publishes it on a durable [`MessageBus`](message_bus::MessageBus). A consuming
//! service pulls [`Delivery`](message_bus::Delivery) values from a subscription,
//! rebuilds the originating trace, processes the event and settles the delivery.
//!
//! ## Core Concepts
//!
//! - **Envelope**: unit of transport (id, opaque payload bytes, string headers)
//! - **Message Bus**: publish/subscribe over a named topic with ack/nack delivery
//! - **Trace Carrier**: moves a trace context in and out of envelope headers
//! - **Event**: a domain fact with a stable type name and a JSON wire form
//! - **Environment**: injected dependencies such as the [`Clock`](environment::Clock)
//!
//! ## Data Flow
//!
//! ```text
//! request ─► producer ─► MessageBus::publish ═══► MessageBus::subscribe ─► consumer loop ─► report store
//!                 │                                                            │
//!                 └── TraceCarrier::inject ─── headers ─── TraceCarrier::extract ┘
//! ```

pub mod envelope;
pub mod event;
pub mod message_bus;
pub mod propagation;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use envelope::{Envelope, Headers};
pub use event::{Event, EventError};
pub use message_bus::{AckState, BusError, Delivery, MessageBus, Subscription};
pub use propagation::{TraceCarrier, TraceContext};

/// Environment module - Dependency injection traits
///
/// All external dependencies the pipeline needs beyond the bus and the trace
/// carrier are abstracted behind traits and injected at construction time.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use order_pipeline_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = chrono::Utc::now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
