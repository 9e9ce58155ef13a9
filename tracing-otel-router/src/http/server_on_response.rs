use http::StatusCode;
use std::fmt;
use std::fmt::Debug;
use std::time::Duration;
use tower_http::LatencyUnit;
use tracing::{Level, Span};

use super::context::Outcome;

pub(crate) enum OpenTelemetryStatusCode {
    Ok,
    Error,
}

impl OpenTelemetryStatusCode {
    pub(crate) fn is_error(&self) -> bool {
        matches!(self, OpenTelemetryStatusCode::Error)
    }
}

impl Debug for OpenTelemetryStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenTelemetryStatusCode::Ok => write!(f, "OK"),
            OpenTelemetryStatusCode::Error => write!(f, "ERROR"),
        }
    }
}

impl From<StatusCode> for OpenTelemetryStatusCode {
    fn from(status: StatusCode) -> Self {
        if status.is_server_error() {
            OpenTelemetryStatusCode::Error
        } else {
            OpenTelemetryStatusCode::Ok
        }
    }
}

impl From<&Outcome> for OpenTelemetryStatusCode {
    fn from(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Completed(status) => (*status).into(),
            Outcome::Failed { .. } => OpenTelemetryStatusCode::Error,
        }
    }
}

struct Latency {
    unit: LatencyUnit,
    duration: Duration,
}

impl fmt::Display for Latency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            LatencyUnit::Seconds => write!(f, "{} s", self.duration.as_secs_f64()),
            LatencyUnit::Millis => write!(f, "{} ms", self.duration.as_millis()),
            LatencyUnit::Micros => write!(f, "{} μs", self.duration.as_micros()),
            LatencyUnit::Nanos => write!(f, "{} ns", self.duration.as_nanos()),
            _ => write!(f, "{} ms", self.duration.as_millis()),
        }
    }
}

/// Records the outcome of a request on its log span and emits the
/// "finished processing request" event.
#[derive(Clone, Debug)]
pub struct ServerOnResponse {
    level: Level,
    latency_unit: LatencyUnit,
}

impl Default for ServerOnResponse {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            latency_unit: LatencyUnit::Millis,
        }
    }
}

impl ServerOnResponse {
    /// Create a new `ServerOnResponse`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the [`Level`] used for the finishing event.
    ///
    /// Defaults to [`Level::INFO`].
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the [`LatencyUnit`] latencies will be reported in.
    ///
    /// Defaults to [`LatencyUnit::Millis`].
    pub fn latency_unit(mut self, latency_unit: LatencyUnit) -> Self {
        self.latency_unit = latency_unit;
        self
    }

    pub(crate) fn on_outcome(&self, outcome: &Outcome, latency: Duration, span: &Span) {
        let latency = Latency {
            unit: self.latency_unit,
            duration: latency,
        };

        span.record(
            "otel.status_code",
            tracing::field::debug(OpenTelemetryStatusCode::from(outcome)),
        );
        if let Some(status) = outcome.status() {
            span.record("http.status_code", status.as_u16());
        }
        let error = outcome.error();

        // `tracing::event!` wants a static level, same as the span macro.
        macro_rules! finished {
            ($level:expr) => {
                tracing::event!(
                    parent: span,
                    $level,
                    %latency,
                    error,
                    "finished processing request"
                )
            };
        }

        match self.level {
            Level::ERROR => finished!(Level::ERROR),
            Level::WARN => finished!(Level::WARN),
            Level::INFO => finished!(Level::INFO),
            Level::DEBUG => finished!(Level::DEBUG),
            Level::TRACE => finished!(Level::TRACE),
        }
    }
}
