use tracing::{Level, Span};

use super::parser::RequestInfo;

/// Builds the per-request log span that handler logs are emitted under.
///
/// The server span is what gets exported; this span only
/// carries the request's fields into `tracing` output.
#[derive(Debug, Clone)]
pub struct MakeServerSpan {
    level: Level,
    component: String,
    include_headers: bool,
}

impl MakeServerSpan {
    /// Create a new `MakeServerSpan`.
    pub fn new() -> Self {
        Self {
            level: Level::DEBUG,
            component: "tower.request".to_string(),
            include_headers: false,
        }
    }

    /// Set the [`Level`] used for the [tracing span].
    ///
    /// Defaults to [`Level::DEBUG`].
    ///
    /// [tracing span]: https://docs.rs/tracing/latest/tracing/#spans
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn component(mut self, component: &str) -> Self {
        self.component = component.to_string();
        self
    }

    /// Include request headers on the [`Span`].
    ///
    /// By default, headers are not included.
    pub fn include_headers(mut self, include_headers: bool) -> Self {
        self.include_headers = include_headers;
        self
    }

    pub fn span_for(&self, request: &RequestInfo) -> Span {
        let (hostname, port) = request.host_and_port().unwrap_or(("unknown", 0));

        macro_rules! make_span {
            ($level:expr) => {
                tracing::span!(
                    $level,
                    "request",
                    component = %self.component,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                    headers = tracing::field::Empty,
                    otel.kind = "server",
                    otel.status_code = tracing::field::Empty,
                    http.host = hostname,
                    http.method = %request.method(),
                    http.route = request.path(),
                    http.status_code = tracing::field::Empty,
                    trace_id = tracing::field::Empty,
                    span_id = tracing::field::Empty,
                    server.address = hostname,
                    server.port = port,
                )
            };
        }

        let span = match self.level {
            Level::ERROR => make_span!(Level::ERROR),
            Level::WARN => make_span!(Level::WARN),
            Level::INFO => make_span!(Level::INFO),
            Level::DEBUG => make_span!(Level::DEBUG),
            Level::TRACE => make_span!(Level::TRACE),
        };
        if self.include_headers {
            span.record("headers", tracing::field::debug(request.headers()));
        }
        span
    }
}

impl Default for MakeServerSpan {
    fn default() -> Self {
        Self::new()
    }
}
