//! A miniature router able to redispatch a request through the whole stack,
//! standing in for the router the tracing layer is installed in front of.

#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use opentelemetry::trace::{SpanKind, Status, TracerProvider as _};
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use opentelemetry_sdk::trace::TracerProvider;
use tokio::sync::oneshot;
use tower::util::BoxCloneService;
use tower::{ServiceBuilder, ServiceExt};
use tracing_otel_router::{HttpTracing, RequestContext, TracedBody, Tracer};

pub const EXTRA_KEY: &str = "user-id";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type BoxBody = UnsyncBoxBody<Bytes, BoxError>;
pub type App = BoxCloneService<Request<Full<Bytes>>, Response<BoxBody>, BoxError>;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Tracer provider exporting every ended span into memory.
pub struct Capture {
    provider: TracerProvider,
    exporter: InMemorySpanExporter,
}

impl Capture {
    pub fn new() -> Self {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        Self { provider, exporter }
    }

    pub fn tracer(&self) -> Tracer {
        Tracer::new(self.provider.tracer("router-tests"))
    }

    /// Spans exported so far, oldest first.
    pub fn spans(&self) -> Vec<SpanData> {
        self.provider.force_flush();
        self.exporter.get_finished_spans().unwrap()
    }

    pub fn server_spans(&self) -> Vec<SpanData> {
        self.spans()
            .into_iter()
            .filter(|span| span.span_kind == SpanKind::Server)
            .collect()
    }
}

pub fn tag(span: &SpanData, key: &str) -> Option<String> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.as_str().into_owned())
}

pub fn error_of(span: &SpanData) -> Option<String> {
    match &span.status {
        Status::Error { description } => Some(description.to_string()),
        _ => None,
    }
}

pub fn tracing_with(capture: &Capture) -> HttpTracing {
    HttpTracing::builder(capture.tracer())
        .extra_fields([EXTRA_KEY])
        .unwrap()
        .build()
}

pub fn app(tracing: HttpTracing) -> App {
    let router = tracing.clone();
    let service = ServiceBuilder::new()
        .layer(tracing.layer())
        .service_fn(move |req| route(router.clone(), req))
        .map_response(|response: Response<TracedBody<BoxBody>>| response.map(BodyExt::boxed_unsync));
    BoxCloneService::new(service)
}

pub fn get(path: &str) -> Request<Full<Bytes>> {
    Request::get(path)
        .header("host", "127.0.0.1:8080")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Sends `request` and reads the whole response body.
pub async fn send(app: App, request: Request<Full<Bytes>>) -> Result<(StatusCode, String), BoxError> {
    let response = app.oneshot(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();
    Ok((status, String::from_utf8_lossy(&body).into_owned()))
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<BoxBody> {
    let body = Full::new(body.into()).map_err(|never| match never {}).boxed_unsync();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

fn empty(status: StatusCode) -> Response<BoxBody> {
    let body = Empty::new().map_err(|never| match never {}).boxed_unsync();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

fn context(req: &Request<Full<Bytes>>) -> RequestContext {
    req.extensions()
        .get::<RequestContext>()
        .cloned()
        .expect("tracing layer installed")
}

/// Runs `work` after the request body has been read, on another task, the
/// way an end-of-body callback would.
async fn on_body_end<F, T>(req: Request<Full<Bytes>>, work: F) -> T
where
    F: FnOnce(RequestContext) -> T + Send + 'static,
    T: Send + 'static,
{
    let ctx = context(&req);
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = req.into_body().collect().await;
        let _ = tx.send(work(ctx));
    });
    rx.await.expect("continuation ran")
}

async fn reroute(
    tracing: HttpTracing,
    mut req: Request<Full<Bytes>>,
    path: &'static str,
) -> Result<Response<BoxBody>, BoxError> {
    *req.uri_mut() = path.parse()?;
    app(tracing).oneshot(req).await
}

fn route(tracing: HttpTracing, req: Request<Full<Bytes>>) -> BoxFuture<Result<Response<BoxBody>, BoxError>> {
    Box::pin(async move {
        let path = req.uri().path().to_string();
        match path.as_str() {
            "/foo" => Ok(text(StatusCode::OK, "bar")),
            "/async" => Ok(on_body_end(req, |_| text(StatusCode::OK, "bar")).await),
            "/reroute" => reroute(tracing, req, "/foo").await,
            "/rerouteAsync" => reroute(tracing, req, "/async").await,
            "/rerouteExtra" => reroute(tracing, req, "/extra").await,
            "/rerouteException" => reroute(tracing, req, "/exceptionAsync").await,
            "/extra" => {
                let ctx = context(&req);
                let value = ctx.extra_field(EXTRA_KEY).unwrap_or_default().to_string();
                Ok(text(StatusCode::OK, value))
            }
            "/badrequest" => Ok(empty(StatusCode::BAD_REQUEST)),
            "/child" => {
                tracing.tracer().next_span("child").finish();
                Ok(text(StatusCode::OK, "happy"))
            }
            "/exception" => {
                let ctx = context(&req);
                ctx.fail(&std::io::Error::new(std::io::ErrorKind::Other, "exception"));
                Ok(empty(StatusCode::INTERNAL_SERVER_ERROR))
            }
            "/exceptionAsync" => {
                let error = on_body_end(req, |ctx| {
                    let error = std::io::Error::new(std::io::ErrorKind::Other, "async exception");
                    ctx.fail(&error);
                    error
                })
                .await;
                Err(error.into())
            }
            "/hang" => std::future::pending().await,
            _ => Ok(empty(StatusCode::NOT_FOUND)),
        }
    })
}
