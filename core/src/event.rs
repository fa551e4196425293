//! Event trait and related types.
//!
//! Events represent facts about things that have happened and are immutable
//! once constructed. On the bus they travel as JSON so that services written
//! against different toolchains can read them.
//!
//! # Example
//!
//! ```
//! use order_pipeline_core::event::Event;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
//! struct OrderShipped {
//!     order_id: String,
//! }
//!
//! impl Event for OrderShipped {
//!     fn event_type(&self) -> &'static str {
//!         "OrderShipped"
//!     }
//! }
//!
//! let event = OrderShipped { order_id: "o-1".to_string() };
//! let bytes = event.to_bytes().unwrap();
//! assert_eq!(OrderShipped::from_bytes(&bytes).unwrap(), event);
//! ```

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Error types for event operations.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),
}

/// A domain event that can be carried in an envelope payload.
///
/// # Event Naming Convention
///
/// `event_type()` returns a stable identifier that is also written to the
/// `event_type` envelope header, e.g. `"OrderCreated"`.
pub trait Event: Send + Sync + 'static {
    /// Returns the event type identifier for this event.
    fn event_type(&self) -> &'static str;

    /// Serialize this event to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        serde_json::to_vec(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes are not valid
    /// JSON or do not match the event's shape.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        serde_json::from_slice(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}
