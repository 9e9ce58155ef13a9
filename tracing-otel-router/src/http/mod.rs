pub mod body;
pub mod context;
pub mod layer;
pub mod parser;
pub mod server_make_span;
pub mod server_on_response;

use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use opentelemetry::trace::SpanKind;

use self::context::{DispatchRecord, Outcome, RequestContext};
use self::layer::TracingLayer;
use self::parser::{
    DefaultParser, HttpServerParser, ParsedTags, RequestInfo, ResponseInfo, HTTP_METHOD, HTTP_PATH,
};
use self::server_make_span::MakeServerSpan;
use self::server_on_response::ServerOnResponse;
use crate::carrier::Carrier;
use crate::config::{AbandonPolicy, TracingConfig};
use crate::error::Result;
use crate::span::Span;
use crate::tracer::Tracer;

struct Inner {
    tracer: Tracer,
    carrier: Carrier,
    parser: Box<dyn HttpServerParser>,
    make_span: MakeServerSpan,
    on_response: ServerOnResponse,
    abandon_policy: AbandonPolicy,
}

/// Server-side HTTP tracing: starts one span per physical request and
/// finishes it exactly once.
///
/// Cheap to clone. Use [`HttpTracing::layer`] to put it in front of a
/// router.
#[derive(Clone)]
pub struct HttpTracing {
    inner: Arc<Inner>,
}

impl fmt::Debug for HttpTracing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTracing")
            .field("tracer", &self.inner.tracer)
            .field("carrier", &self.inner.carrier)
            .field("make_span", &self.inner.make_span)
            .field("on_response", &self.inner.on_response)
            .field("abandon_policy", &self.inner.abandon_policy)
            .finish_non_exhaustive()
    }
}

impl HttpTracing {
    pub fn builder(tracer: Tracer) -> HttpTracingBuilder {
        HttpTracingBuilder::new(tracer)
    }

    pub fn new(tracer: Tracer) -> Self {
        Self::builder(tracer).build()
    }

    pub fn from_config(tracer: Tracer, config: &TracingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::builder(tracer)
            .carrier(Carrier::new(&config.extra_fields)?)
            .make_span(
                MakeServerSpan::new()
                    .component(&config.service_name)
                    .level(config.level()?),
            )
            .abandon_policy(config.abandon_policy)
            .build())
    }

    pub fn tracer(&self) -> &Tracer {
        &self.inner.tracer
    }

    pub fn carrier(&self) -> &Carrier {
        &self.inner.carrier
    }

    pub fn layer(&self) -> TracingLayer {
        TracingLayer::new(self.clone())
    }

    /// Returns the server span of `ctx`, starting it on first use.
    ///
    /// Later calls for the same context are redispatches of a request that is
    /// already traced: they are counted as reroutes and return the existing
    /// span untouched. A call after the request went terminal is logged and
    /// otherwise ignored.
    pub fn on_request_start(&self, ctx: &RequestContext) -> Span {
        let mut started = false;
        let record = ctx.inner.dispatch.get_or_init(|| {
            started = true;
            self.start_record(ctx)
        });

        if !started {
            if ctx.is_terminal() {
                tracing::warn!(
                    path = ctx.request().path(),
                    trace_id = %record.span.trace_id(),
                    "request redispatched after it completed; span left as is"
                );
            } else {
                let reroutes = ctx.record_reroute();
                tracing::trace!(
                    path = ctx.request().path(),
                    reroutes,
                    "reusing server span"
                );
            }
        }

        record.span.clone()
    }

    fn start_record(&self, ctx: &RequestContext) -> DispatchRecord {
        let request = ctx.request();
        let (parent, extra) = self.inner.carrier.extract(request.headers());
        let span = self.inner.tracer.start_span(
            self.inner.parser.span_name(request),
            SpanKind::Server,
            parent.as_ref(),
        );
        span.tag(HTTP_METHOD, request.method().as_str())
            .tag(HTTP_PATH, request.path());

        let log_span = self.inner.make_span.span_for(request);
        log_span.record("trace_id", tracing::field::display(span.trace_id()));
        log_span.record("span_id", tracing::field::display(span.span_id()));
        crate::otel::link_log_span(&log_span, &span);
        ctx.attach_log_span(log_span);

        tracing::debug!(
            method = %request.method(),
            path = request.path(),
            trace_id = %span.trace_id(),
            span_id = %span.span_id(),
            remote_parent = parent.is_some(),
            extra_fields = extra.len(),
            "server span started"
        );

        DispatchRecord {
            span,
            extra,
            started: std::time::Instant::now(),
        }
    }

    /// What the parser would write for `ctx` given what is known about the
    /// response. Request tags always come from the original inbound request,
    /// so a reroute never changes `http.path`.
    pub fn extract_tags(&self, ctx: &RequestContext, response: &ResponseInfo) -> ParsedTags {
        parser::extract_tags(self.inner.parser.as_ref(), ctx.request(), response)
    }

    /// Reached only through the context's completion token.
    pub(crate) fn on_request_terminal(
        &self,
        request: &RequestInfo,
        record: &DispatchRecord,
        log_span: Option<&tracing::Span>,
        outcome: Outcome,
    ) {
        let mut span = record.span.clone();
        let response = ResponseInfo::from(&outcome);
        parser::apply(self.inner.parser.as_ref(), request, &response, &mut span);
        span.finish();

        if let Some(log_span) = log_span {
            self.inner
                .on_response
                .on_outcome(&outcome, record.started.elapsed(), log_span);
        }
    }

    pub(crate) fn on_request_abandoned(
        &self,
        request: &RequestInfo,
        record: &DispatchRecord,
        log_span: Option<&tracing::Span>,
        status: Option<StatusCode>,
    ) {
        match self.inner.abandon_policy {
            AbandonPolicy::Fail => {
                tracing::warn!(
                    path = request.path(),
                    status = status.map(|status| status.as_u16()),
                    trace_id = %record.span.trace_id(),
                    "request dropped before completing; failing span"
                );
                let outcome = Outcome::Failed {
                    status,
                    error: "abandoned".to_string(),
                };
                self.on_request_terminal(request, record, log_span, outcome);
            }
            AbandonPolicy::Ignore => {
                record.span.finish();
                tracing::debug!(
                    path = request.path(),
                    status = status.map(|status| status.as_u16()),
                    trace_id = %record.span.trace_id(),
                    "request dropped before completing; span ended as is"
                );
            }
        }
    }
}

/// Builder for [`HttpTracing`].
pub struct HttpTracingBuilder {
    tracer: Tracer,
    carrier: Carrier,
    parser: Box<dyn HttpServerParser>,
    make_span: MakeServerSpan,
    on_response: ServerOnResponse,
    abandon_policy: AbandonPolicy,
}

impl HttpTracingBuilder {
    fn new(tracer: Tracer) -> Self {
        Self {
            tracer,
            carrier: Carrier::default(),
            parser: Box::new(DefaultParser),
            make_span: MakeServerSpan::new(),
            on_response: ServerOnResponse::new(),
            abandon_policy: AbandonPolicy::default(),
        }
    }

    pub fn carrier(mut self, carrier: Carrier) -> Self {
        self.carrier = carrier;
        self
    }

    /// Whitelists extra field names on the current carrier.
    pub fn extra_fields<I, N>(mut self, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        self.carrier = self.carrier.with_extra_fields(names)?;
        Ok(self)
    }

    /// Tag customization hook, run once per request against the live server
    /// span at its terminal event.
    pub fn parser<P>(mut self, parser: P) -> Self
    where
        P: HttpServerParser,
    {
        self.parser = Box::new(parser);
        self
    }

    pub fn make_span(mut self, make_span: MakeServerSpan) -> Self {
        self.make_span = make_span;
        self
    }

    pub fn on_response(mut self, on_response: ServerOnResponse) -> Self {
        self.on_response = on_response;
        self
    }

    pub fn abandon_policy(mut self, abandon_policy: AbandonPolicy) -> Self {
        self.abandon_policy = abandon_policy;
        self
    }

    pub fn build(self) -> HttpTracing {
        HttpTracing {
            inner: Arc::new(Inner {
                tracer: self.tracer,
                carrier: self.carrier,
                parser: self.parser,
                make_span: self.make_span,
                on_response: self.on_response,
                abandon_policy: self.abandon_policy,
            }),
        }
    }
}
