//! Server-side request tracing for tower-based HTTP routers.
//!
//! [`HttpTracing`] opens one span per physical inbound request, tags it with
//! the request's method, path and status, and finishes it exactly once. The
//! guarantees hold when a router redispatches a request internally (the
//! recorded path stays the one the client asked for) and when a handler
//! completes on a later poll than the one that started it.
//!
//! ```ignore
//! let tracing = HttpTracing::builder(Tracer::global("frontend"))
//!     .extra_fields(["x-vcap-request-id"])?
//!     .build();
//!
//! let app = tower::ServiceBuilder::new()
//!     .layer(tracing.layer())
//!     .service(router);
//! ```
//!
//! Server spans are live OpenTelemetry spans: sampling, ids and export are
//! whatever the tracer provider behind [`Tracer`] is configured with.

pub mod carrier;
pub mod config;
pub mod error;
pub mod http;
pub mod otel;
pub mod span;
pub mod tracer;

#[cfg(test)]
mod testing;

pub use carrier::{Carrier, ExtraFields};
pub use config::{AbandonPolicy, TracingConfig};
pub use error::TracingError;
pub use self::http::body::TracedBody;
pub use self::http::context::{Outcome, RequestContext};
pub use self::http::layer::{TracingLayer, TracingService};
pub use self::http::parser::{HttpServerParser, ParsedTags, RequestInfo, ResponseInfo};
pub use self::http::{HttpTracing, HttpTracingBuilder};
pub use span::{Span, SpanCustomizer};
pub use tracer::Tracer;
