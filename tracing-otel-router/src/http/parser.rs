use std::collections::BTreeMap;

use http::{HeaderMap, Method, Request, StatusCode, Uri, Version};

use super::context::Outcome;
use super::server_on_response::OpenTelemetryStatusCode;
use crate::span::SpanCustomizer;
pub use crate::span::ERROR;

pub const HTTP_METHOD: &str = "http.method";
pub const HTTP_PATH: &str = "http.path";
pub const HTTP_URL: &str = "http.url";
pub const HTTP_STATUS_CODE: &str = "http.status_code";

/// Immutable snapshot of an inbound request, taken before any routing.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
}

impl RequestInfo {
    pub fn from_request<B>(request: &Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
            headers: request.headers().clone(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Host and port from the URI, or from the `Host` header for origin-form
    /// requests.
    pub fn host_and_port(&self) -> Option<(&str, u16)> {
        if let Some(host) = self.uri.host() {
            let default_port = match self.uri.scheme_str() {
                Some("https") => 443,
                _ => 80,
            };
            let port = self.uri.port_u16().unwrap_or(default_port);
            return Some((host, port));
        }
        let host = self.header(http::header::HOST.as_str())?;
        let mut parts = host.splitn(2, ':');
        let hostname = parts.next().filter(|h| !h.is_empty())?;
        let port = parts.next().and_then(|p| p.parse().ok()).unwrap_or(80);
        Some((hostname, port))
    }

    /// Absolute URL of the request. Origin-form requests are resolved against
    /// the `Host` header; without one only the path and query are returned.
    pub fn url(&self) -> String {
        if self.uri.scheme().is_some() && self.uri.authority().is_some() {
            return self.uri.to_string();
        }
        let path_and_query = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        match self.header(http::header::HOST.as_str()) {
            Some(host) => format!("http://{host}{path_and_query}"),
            None => path_and_query.to_string(),
        }
    }
}

/// What is known about the response at the terminal event. Either field may
/// be missing when the response was never fully written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseInfo {
    pub status: Option<StatusCode>,
    pub error: Option<String>,
}

impl From<&Outcome> for ResponseInfo {
    fn from(outcome: &Outcome) -> Self {
        Self {
            status: outcome.status(),
            error: outcome.error().map(str::to_string),
        }
    }
}

/// Tag customization hook, supplied when building
/// [`HttpTracing`](super::HttpTracing).
///
/// Both methods run once, when the request reaches its terminal event, against
/// the live server span: tags set here replace the span's current ones and
/// [`SpanCustomizer::name`] renames it. Override a method and call the
/// matching `default_*` function to keep the standard tags:
///
/// ```
/// use tracing_otel_router::http::parser::{default_request_tags, HttpServerParser, RequestInfo};
/// use tracing_otel_router::SpanCustomizer;
///
/// struct WithUrl;
///
/// impl HttpServerParser for WithUrl {
///     fn request(&self, request: &RequestInfo, customizer: &mut dyn SpanCustomizer) {
///         default_request_tags(request, customizer);
///         customizer.tag("http.url", &request.url());
///     }
/// }
/// ```
pub trait HttpServerParser: Send + Sync + 'static {
    fn span_name(&self, request: &RequestInfo) -> String {
        request.method().as_str().to_string()
    }

    fn request(&self, request: &RequestInfo, customizer: &mut dyn SpanCustomizer) {
        default_request_tags(request, customizer);
    }

    fn response(&self, response: &ResponseInfo, customizer: &mut dyn SpanCustomizer) {
        default_response_tags(response, customizer);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultParser;

impl HttpServerParser for DefaultParser {}

pub fn default_request_tags(request: &RequestInfo, customizer: &mut dyn SpanCustomizer) {
    customizer.tag(HTTP_METHOD, request.method().as_str());
    customizer.tag(HTTP_PATH, request.path());
}

/// Tags the status code when known, and `error` with the failure description,
/// or with the status code of a server error.
pub fn default_response_tags(response: &ResponseInfo, customizer: &mut dyn SpanCustomizer) {
    if let Some(status) = response.status {
        customizer.tag(HTTP_STATUS_CODE, status.as_str());
    }
    match (&response.error, response.status) {
        (Some(error), _) => customizer.tag(ERROR, error),
        (None, Some(status)) if OpenTelemetryStatusCode::from(status).is_error() => {
            customizer.tag(ERROR, status.as_str())
        }
        _ => {}
    }
}

/// Name and tags a parser produced away from any span.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTags {
    pub name: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl ParsedTags {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

impl SpanCustomizer for ParsedTags {
    fn tag(&mut self, key: &str, value: &str) {
        self.tags.insert(key.to_string(), value.to_string());
    }

    fn name(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }

    fn tag_value(&self, key: &str) -> Option<String> {
        self.tags.get(key).cloned()
    }
}

/// Runs the request then the response half of `parser` against `customizer`.
pub fn apply(
    parser: &dyn HttpServerParser,
    request: &RequestInfo,
    response: &ResponseInfo,
    customizer: &mut dyn SpanCustomizer,
) {
    parser.request(request, customizer);
    parser.response(response, customizer);
}

/// What `parser` writes for a request given what is known about its response.
pub fn extract_tags(
    parser: &dyn HttpServerParser,
    request: &RequestInfo,
    response: &ResponseInfo,
) -> ParsedTags {
    let mut parsed = ParsedTags::default();
    apply(parser, request, response, &mut parsed);
    parsed
}
