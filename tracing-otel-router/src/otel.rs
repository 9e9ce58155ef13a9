//! Glue between server spans and `tracing` output.

use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::span::Span;

/// OpenTelemetry context whose active span is `span`.
pub fn context_of(span: &Span) -> Context {
    Context::new().with_remote_span_context(span.context().clone())
}

/// Parents a `tracing` span under `span`, so log output and child spans
/// emitted while it is entered join the request's trace. Has no effect
/// unless a `tracing_opentelemetry` layer is installed.
pub fn link_log_span(log_span: &tracing::Span, span: &Span) {
    log_span.set_parent(context_of(span));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Capture;
    use pretty_assertions::assert_eq;

    #[test]
    fn context_carries_span_ids() {
        let capture = Capture::new();
        let span = capture.tracer().next_span("work");

        let cx = context_of(&span);
        let otel = cx.span();
        assert_eq!(otel.span_context().trace_id(), span.trace_id());
        assert_eq!(otel.span_context().span_id(), span.span_id());
        assert!(otel.span_context().is_sampled());
    }

    #[test]
    fn log_span_without_bridge_is_left_alone() {
        let capture = Capture::new();
        let span = capture.tracer().next_span("work");
        let log_span = tracing::info_span!("request");

        link_log_span(&log_span, &span);
        span.finish();

        assert_eq!(capture.spans().len(), 1);
    }
}
