use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::{Request, Response};
use http_body::Body;
use tower::{Layer, Service};
use tracing::Instrument;

use super::body::TracedBody;
use super::context::RequestContext;
use super::parser::RequestInfo;
use super::HttpTracing;

/// [`Layer`] that puts one server span around every physical request.
///
/// Install it outermost, so it sees a request before the router does. When
/// the router redispatches a request through the stack again, the request
/// still carries its [`RequestContext`] and the layer lets it pass untouched.
#[derive(Debug, Clone)]
pub struct TracingLayer {
    tracing: HttpTracing,
}

impl TracingLayer {
    pub fn new(tracing: HttpTracing) -> Self {
        Self { tracing }
    }
}

impl<S> Layer<S> for TracingLayer {
    type Service = TracingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        TracingService {
            inner: service,
            tracing: self.tracing.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TracingService<S> {
    inner: S,
    tracing: HttpTracing,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for TracingService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: fmt::Display + fmt::Debug + 'static,
    ReqBody: 'static,
    ResBody: Body + 'static,
{
    type Response = Response<TracedBody<ResBody>>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        if let Some(ctx) = req.extensions().get::<RequestContext>().cloned() {
            self.tracing.on_request_start(&ctx);
            if let Some(log_span) = ctx.log_span() {
                tracing::debug!(
                    parent: log_span,
                    from = ctx.request().path(),
                    to = req.uri().path(),
                    reroutes = ctx.reroute_count(),
                    "request rerouted"
                );
            }

            let future = self.inner.call(req);
            return Box::pin(async move {
                let response = future.await?;
                let status = response.status();
                Ok(response.map(|body| TracedBody::passthrough(body, status)))
            });
        }

        let ctx = RequestContext::new(self.tracing.clone(), RequestInfo::from_request(&req));
        self.tracing.on_request_start(&ctx);
        let log_span = ctx.log_span().cloned().unwrap_or_else(tracing::Span::none);
        req.extensions_mut().insert(ctx.clone());

        let future = {
            let _entered = log_span.enter();
            self.inner.call(req)
        };
        Box::pin(async move {
            match future.instrument(log_span).await {
                Ok(response) => {
                    let status = response.status();
                    Ok(response.map(|body| TracedBody::new(body, ctx, status)))
                }
                Err(err) => {
                    ctx.fail(&err);
                    Err(err)
                }
            }
        })
    }
}
