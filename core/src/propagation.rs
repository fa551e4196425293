//! Trace context propagation through envelope headers.
//!
//! Producer and consumer run as separate processes connected only by the bus,
//! so the trace has to travel out-of-band in message metadata. The pipeline only
//! needs inject/extract semantics; the tracing backend stays behind the
//! [`TraceCarrier`] trait.
//!
//! ```text
//! producer span ──current()──► TraceContext ──inject()──► headers
//!                                                             │
//! consumer span ◄──attach()── TraceContext ◄──extract()───────┘
//! ```

use crate::envelope::Headers;
use std::fmt;
use tracing::Span;

/// Identifying context of a span in a distributed trace.
///
/// Identifiers are lowercase hex strings (32 characters for the trace id,
/// 16 for the span id); `flags` holds the trace flags byte (bit 0 = sampled).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TraceContext {
    /// Trace identifier shared by every span of the trace
    pub trace_id: String,
    /// Identifier of the span that becomes the remote parent
    pub span_id: String,
    /// Trace flags
    pub flags: u8,
}

impl TraceContext {
    /// Sampled flag bit.
    pub const SAMPLED: u8 = 0x01;

    /// Create a context from its parts.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, span_id: impl Into<String>, flags: u8) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            flags,
        }
    }

    /// Whether the sampled flag is set.
    #[must_use]
    pub const fn is_sampled(&self) -> bool {
        self.flags & Self::SAMPLED == Self::SAMPLED
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.trace_id, self.span_id)
    }
}

/// Bidirectional mapping between trace contexts and flat header sets.
///
/// Implementations never fail the caller: missing or malformed headers simply
/// yield no context, and injection leaves unrelated header keys untouched.
pub trait TraceCarrier: Send + Sync {
    /// Write `context` into `headers` using the carrier's propagation encoding.
    fn inject(&self, context: &TraceContext, headers: &mut Headers);

    /// Rebuild a context from `headers`, or `None` when the expected keys are
    /// absent or invalid.
    fn extract(&self, headers: &Headers) -> Option<TraceContext>;

    /// Context of a live `tracing` span, if the span is part of a trace.
    fn current(&self, span: &Span) -> Option<TraceContext>;

    /// Make `parent` the remote parent of `span`.
    fn attach(&self, span: &Span, parent: &TraceContext);

    /// Convenience: inject the context of `span` if it has one.
    ///
    /// Returns the injected context.
    fn inject_span(&self, span: &Span, headers: &mut Headers) -> Option<TraceContext> {
        let context = self.current(span)?;
        self.inject(&context, headers);
        Some(context)
    }
}

/// Carrier that propagates nothing.
///
/// Used where no tracing backend is configured; consumers then start
/// unparented spans and processing proceeds normally.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTraceCarrier;

impl TraceCarrier for NoopTraceCarrier {
    fn inject(&self, _context: &TraceContext, _headers: &mut Headers) {}

    fn extract(&self, _headers: &Headers) -> Option<TraceContext> {
        None
    }

    fn current(&self, _span: &Span) -> Option<TraceContext> {
        None
    }

    fn attach(&self, _span: &Span, _parent: &TraceContext) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampled_flag() {
        let sampled = TraceContext::new("a".repeat(32), "b".repeat(16), 0x01);
        let unsampled = TraceContext::new("a".repeat(32), "b".repeat(16), 0x00);
        assert!(sampled.is_sampled());
        assert!(!unsampled.is_sampled());
    }

    #[test]
    fn noop_carrier_never_produces_context() {
        let carrier = NoopTraceCarrier;
        let mut headers = Headers::new();
        headers.insert("traceparent".to_string(), "ignored".to_string());

        carrier.inject(&TraceContext::new("t", "s", 1), &mut headers);
        assert_eq!(headers.len(), 1);
        assert!(carrier.extract(&headers).is_none());
        assert!(carrier.inject_span(&Span::none(), &mut headers).is_none());
    }
}
