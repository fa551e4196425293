//! # Order Pipeline Testing
//!
//! Testing utilities and helpers for the order event pipeline.
//!
//! This crate provides:
//! - [`InMemoryMessageBus`]: durable-queue bus with ack/nack, redelivery and failure injection
//! - [`FixedClock`]: deterministic time
//! - [`init_test_tracing`]: tracing subscriber writing to the test output
//! - [`wait_until`]: poll a condition with a deadline
//!
//! ## Example
//!
//! ```ignore
//! use order_pipeline_testing::{InMemoryMessageBus, wait_until};
//!
//! #[tokio::test]
//! async fn report_is_stored() {
//!     let bus = InMemoryMessageBus::new();
//!     // ... start consumer, publish ...
//!     assert!(wait_until(Duration::from_secs(1), || bus.acked_count() == 1).await);
//! }
//! ```

use chrono::{DateTime, Utc};
use order_pipeline_core::environment::Clock;
use std::time::Duration;

pub mod message_bus;

pub use message_bus::InMemoryMessageBus;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use order_pipeline_testing::mocks::FixedClock;
    /// use order_pipeline_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};

/// Install a debug-level subscriber that writes to the test harness output.
///
/// Returns a guard; the subscriber is active for the current thread until the
/// guard is dropped.
#[must_use]
pub fn init_test_tracing() -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::new("debug"))
        .with(fmt::layer().with_test_writer());

    tracing::subscriber::set_default(subscriber)
}

/// Poll `condition` every few milliseconds until it holds or `timeout` elapses.
///
/// Returns whether the condition was observed to hold.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
