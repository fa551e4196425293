//! W3C Trace Context propagation over OpenTelemetry.
//!
//! Maps a [`TraceContext`] to and from the standard `traceparent` /
//! `tracestate` keys, and bridges `tracing` spans to OpenTelemetry span
//! contexts through `tracing-opentelemetry`.

use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::Context as OtelContext;
use opentelemetry::trace::{
    SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use order_pipeline_core::envelope::Headers;
use order_pipeline_core::propagation::{TraceCarrier, TraceContext};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Header written by the W3C propagator.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// [`TraceCarrier`] speaking W3C Trace Context.
///
/// `current` and `attach` only have an effect when the OpenTelemetry layer is
/// part of the installed subscriber (see [`crate::init_tracing`]).
#[derive(Debug, Default)]
pub struct W3cTraceCarrier {
    propagator: TraceContextPropagator,
}

impl W3cTraceCarrier {
    /// Create a carrier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// OpenTelemetry context with `context` as its remote span, if the ids parse.
fn remote_context(context: &TraceContext) -> Option<OtelContext> {
    let trace_id = TraceId::from_hex(&context.trace_id).ok()?;
    let span_id = SpanId::from_hex(&context.span_id).ok()?;
    let span_context = SpanContext::new(
        trace_id,
        span_id,
        TraceFlags::new(context.flags),
        true,
        TraceState::default(),
    );
    span_context
        .is_valid()
        .then(|| OtelContext::new().with_remote_span_context(span_context))
}

fn from_span_context(span_context: &SpanContext) -> Option<TraceContext> {
    span_context.is_valid().then(|| {
        TraceContext::new(
            span_context.trace_id().to_string(),
            span_context.span_id().to_string(),
            span_context.trace_flags().to_u8(),
        )
    })
}

impl TraceCarrier for W3cTraceCarrier {
    fn inject(&self, context: &TraceContext, headers: &mut Headers) {
        match remote_context(context) {
            Some(cx) => self.propagator.inject_context(&cx, headers),
            None => tracing::debug!(%context, "Skipping injection of invalid trace context"),
        }
    }

    fn extract(&self, headers: &Headers) -> Option<TraceContext> {
        let cx = self.propagator.extract(headers);
        from_span_context(cx.span().span_context())
    }

    fn current(&self, span: &Span) -> Option<TraceContext> {
        let cx = span.context();
        from_span_context(cx.span().span_context())
    }

    fn attach(&self, span: &Span, parent: &TraceContext) {
        if let Some(cx) = remote_context(parent) {
            span.set_parent(cx);
        }
    }
}
