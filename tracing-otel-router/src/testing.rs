use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use opentelemetry_sdk::trace::TracerProvider;

use crate::tracer::Tracer;

/// Tracer provider exporting every ended span into memory.
pub(crate) struct Capture {
    provider: TracerProvider,
    exporter: InMemorySpanExporter,
}

impl Capture {
    pub(crate) fn new() -> Self {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        Self { provider, exporter }
    }

    pub(crate) fn tracer(&self) -> Tracer {
        Tracer::new(self.provider.tracer("tracing-otel-router"))
    }

    /// Spans exported so far, oldest first.
    pub(crate) fn spans(&self) -> Vec<SpanData> {
        self.provider.force_flush();
        self.exporter.get_finished_spans().unwrap()
    }

    pub(crate) fn attribute(span: &SpanData, key: &str) -> Option<String> {
        span.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.as_str().into_owned())
    }
}
