use thiserror::Error;

/// Errors raised while assembling the tracing interceptor.
///
/// Nothing in here is produced while a request is in flight: tracing is
/// best-effort once requests are flowing and never changes a response.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("invalid extra field name {name:?}: {source}")]
    InvalidFieldName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },

    #[error("extra field {0:?} collides with a trace context header")]
    ReservedFieldName(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TracingError>;
