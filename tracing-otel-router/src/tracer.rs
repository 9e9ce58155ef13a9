use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::trace::{self, SpanContext, SpanKind, TraceContextExt, Tracer as _};
use opentelemetry::Context;

use crate::span::Span;

/// Starts spans on an OpenTelemetry tracer.
///
/// Sampling, id generation and export are the tracer provider's business.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<BoxedTracer>,
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl Tracer {
    pub fn new<T, S>(tracer: T) -> Self
    where
        T: trace::Tracer<Span = S> + Send + Sync + 'static,
        S: trace::Span + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(BoxedTracer::new(Box::new(tracer))),
        }
    }

    /// A tracer from the globally installed provider.
    pub fn global(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            inner: Arc::new(global::tracer(name)),
        }
    }

    /// Starts a span under `parent`, or a new trace when there is none.
    pub fn start_span(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        parent: Option<&SpanContext>,
    ) -> Span {
        let parent_cx = match parent {
            Some(parent) if parent.is_valid() => {
                Context::new().with_remote_span_context(parent.clone())
            }
            _ => Context::new(),
        };
        let otel = self
            .inner
            .span_builder(name)
            .with_kind(kind)
            .start_with_context(self.inner.as_ref(), &parent_cx);
        Span::new(otel)
    }

    /// A new root span, unrelated to whatever request is being served.
    pub fn next_span(&self, name: impl Into<Cow<'static, str>>) -> Span {
        self.start_span(name, SpanKind::Internal, None)
    }

    pub fn child_span(&self, name: impl Into<Cow<'static, str>>, parent: &Span) -> Span {
        self.start_span(name, SpanKind::Internal, Some(parent.context()))
    }
}
