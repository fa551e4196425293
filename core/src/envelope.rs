//! Message envelope: the unit of transport on the message bus.
//!
//! An [`Envelope`] carries an opaque payload together with a flat map of string
//! headers. Headers hold transport metadata (trace propagation keys, event type,
//! source service) and are never interpreted by the bus itself.
//!
//! # Example
//!
//! ```
//! use order_pipeline_core::envelope::Envelope;
//!
//! let envelope = Envelope::new(br#"{"order_id":"o-1"}"#.to_vec())
//!     .with_header("event_type", "OrderCreated");
//!
//! assert_eq!(envelope.header("event_type"), Some("OrderCreated"));
//! assert!(!envelope.id().is_empty());
//! ```

use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Flat string-keyed header map carried alongside every envelope.
///
/// Insertion order is irrelevant.
pub type Headers = HashMap<String, String>;

/// Header naming the domain event type carried in the payload.
pub const EVENT_TYPE_HEADER: &str = "event_type";

/// Header naming the service that published the envelope.
pub const SOURCE_SERVICE_HEADER: &str = "source_service";

/// Header describing the payload encoding.
pub const CONTENT_TYPE_HEADER: &str = "content_type";

/// A message travelling over the bus.
///
/// The id is unique per message and unrelated to any domain identifier inside
/// the payload. Payload and id are fixed at construction; only the headers can
/// be changed afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    id: String,
    payload: Vec<u8>,
    headers: Headers,
}

impl Envelope {
    /// Create an envelope with a fresh UUID v4 id and no headers.
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), payload)
    }

    /// Create an envelope with an explicit id.
    ///
    /// Used by bus implementations to rebuild envelopes received off the wire.
    #[must_use]
    pub fn with_id(id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            payload,
            headers: Headers::new(),
        }
    }

    /// Add a header, replacing any previous value under the same key.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Replace all headers.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Unique message id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Opaque payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// All headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable access to the headers (used by trace injection).
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Look up a single header value.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Envelope {{ id: {}, size: {} bytes, headers: {} }}",
            self.id,
            self.payload.len(),
            self.headers.len()
        )
    }
}
