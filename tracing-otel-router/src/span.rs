use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use opentelemetry::global::BoxedSpan;
use opentelemetry::trace::{Span as _, SpanContext, SpanId, Status, TraceId};
use opentelemetry::KeyValue;

/// Tag key that also marks a span as failed.
pub const ERROR: &str = "error";

/// Writable view of a span's name and current tags, handed to tag
/// customization hooks.
pub trait SpanCustomizer {
    /// Sets `key`, replacing any earlier value.
    fn tag(&mut self, key: &str, value: &str);

    fn name(&mut self, name: &str);

    /// Current value of `key`.
    fn tag_value(&self, key: &str) -> Option<String>;
}

struct State {
    otel: Option<BoxedSpan>,
    tags: BTreeMap<String, String>,
}

struct Inner {
    context: SpanContext,
    state: Mutex<State>,
}

/// Handle to a live OpenTelemetry span. Clones refer to the same span.
///
/// Tags are kept one value per key and written to the span when it ends,
/// together with an error status if the `error` tag is set. Writes after
/// [`Span::finish`] are ignored.
#[derive(Clone)]
pub struct Span {
    inner: Arc<Inner>,
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("trace_id", &self.inner.context.trace_id())
            .field("span_id", &self.inner.context.span_id())
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl Span {
    pub(crate) fn new(otel: BoxedSpan) -> Self {
        Self {
            inner: Arc::new(Inner {
                context: otel.span_context().clone(),
                state: Mutex::new(State {
                    otel: Some(otel),
                    tags: BTreeMap::new(),
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn context(&self) -> &SpanContext {
        &self.inner.context
    }

    pub fn trace_id(&self) -> TraceId {
        self.inner.context.trace_id()
    }

    pub fn span_id(&self) -> SpanId {
        self.inner.context.span_id()
    }

    /// Sets a tag. The `error` key also marks the span as failed.
    pub fn tag(&self, key: &str, value: impl Into<String>) -> &Self {
        let mut state = self.state();
        if state.otel.is_some() {
            state.tags.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn tag_value(&self, key: &str) -> Option<String> {
        self.state().tags.get(key).cloned()
    }

    pub fn rename(&self, name: impl Into<String>) -> &Self {
        if let Some(otel) = self.state().otel.as_mut() {
            otel.update_name(name.into());
        }
        self
    }

    /// Marks the span as failed with `description`.
    pub fn error(&self, description: impl Into<String>) -> &Self {
        self.tag(ERROR, description)
    }

    pub fn is_finished(&self) -> bool {
        self.state().otel.is_none()
    }

    /// Ends the span, handing it to the tracer's pipeline.
    ///
    /// Returns `false` when the span was already finished.
    pub fn finish(&self) -> bool {
        let (mut otel, tags) = {
            let mut state = self.state();
            let Some(otel) = state.otel.take() else {
                return false;
            };
            (otel, std::mem::take(&mut state.tags))
        };
        if let Some(error) = tags.get(ERROR) {
            otel.set_status(Status::error(error.clone()));
        }
        otel.set_attributes(
            tags.into_iter()
                .map(|(key, value)| KeyValue::new(key, value)),
        );
        otel.end();
        true
    }
}

impl SpanCustomizer for Span {
    fn tag(&mut self, key: &str, value: &str) {
        Span::tag(self, key, value);
    }

    fn name(&mut self, name: &str) {
        self.rename(name);
    }

    fn tag_value(&self, key: &str) -> Option<String> {
        Span::tag_value(self, key)
    }
}
