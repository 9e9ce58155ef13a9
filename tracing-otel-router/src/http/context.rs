use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use http::StatusCode;

use super::parser::RequestInfo;
use super::HttpTracing;
use crate::carrier::ExtraFields;
use crate::span::Span;

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed(StatusCode),
    Failed {
        status: Option<StatusCode>,
        error: String,
    },
}

impl Outcome {
    pub fn failed<E>(error: &E) -> Self
    where
        E: fmt::Display + fmt::Debug + ?Sized,
    {
        Outcome::Failed {
            status: None,
            error: describe(error),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Outcome::Completed(status) => Some(*status),
            Outcome::Failed { status, .. } => *status,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Completed(_) => None,
            Outcome::Failed { error, .. } => Some(error),
        }
    }
}

/// An error's message, or its debug rendering when the message is empty.
fn describe<E>(error: &E) -> String
where
    E: fmt::Display + fmt::Debug + ?Sized,
{
    let message = error.to_string();
    if message.is_empty() {
        format!("{error:?}")
    } else {
        message
    }
}

/// Created the first time a span is started for a request. Its presence is
/// what makes a later dispatch of the same request a reroute.
pub(crate) struct DispatchRecord {
    pub(crate) span: Span,
    pub(crate) extra: ExtraFields,
    pub(crate) started: Instant,
}

/// One-shot completion token: the first claim wins.
#[derive(Default)]
struct Completion(AtomicBool);

impl Completion {
    fn claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_claimed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub(crate) struct Inner {
    pub(crate) tracing: HttpTracing,
    pub(crate) request: RequestInfo,
    pub(crate) dispatch: OnceLock<DispatchRecord>,
    pub(crate) log_span: OnceLock<tracing::Span>,
    completion: Completion,
    reroutes: AtomicUsize,
}

/// Identity of one physical inbound request.
///
/// Stable across reroutes and across the turns a handler's future is polled
/// on. Clones share the same identity; the layer stores one in the request
/// extensions, where handlers pick it up:
///
/// ```ignore
/// let ctx = req.extensions().get::<RequestContext>().cloned();
/// let user = ctx.as_ref().and_then(|ctx| ctx.extra_field("user-id"));
/// ```
#[derive(Clone)]
pub struct RequestContext {
    pub(crate) inner: Arc<Inner>,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", self.inner.request.method())
            .field("path", &self.inner.request.path())
            .field("started", &self.inner.dispatch.get().is_some())
            .field("terminal", &self.is_terminal())
            .field("reroutes", &self.reroute_count())
            .finish()
    }
}

impl RequestContext {
    pub fn new(tracing: HttpTracing, request: RequestInfo) -> Self {
        Self {
            inner: Arc::new(Inner {
                tracing,
                request,
                dispatch: OnceLock::new(),
                log_span: OnceLock::new(),
                completion: Completion::default(),
                reroutes: AtomicUsize::new(0),
            }),
        }
    }

    /// The request as it first arrived, before any reroute.
    pub fn request(&self) -> &RequestInfo {
        &self.inner.request
    }

    /// The server span, once started.
    pub fn span(&self) -> Option<&Span> {
        self.inner.dispatch.get().map(|record| &record.span)
    }

    pub fn extra_fields(&self) -> Option<&ExtraFields> {
        self.inner.dispatch.get().map(|record| &record.extra)
    }

    pub fn extra_field(&self, name: &str) -> Option<&str> {
        self.extra_fields()?.get(name)
    }

    pub fn reroute_count(&self) -> usize {
        self.inner.reroutes.load(Ordering::Relaxed)
    }

    pub fn is_terminal(&self) -> bool {
        self.inner.completion.is_claimed()
    }

    pub(crate) fn record_reroute(&self) -> usize {
        self.inner.reroutes.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn attach_log_span(&self, span: tracing::Span) {
        let _ = self.inner.log_span.set(span);
    }

    pub(crate) fn log_span(&self) -> Option<&tracing::Span> {
        self.inner.log_span.get()
    }

    /// The response was fully produced with `status`.
    pub fn complete(&self, status: StatusCode) -> bool {
        self.terminate(Outcome::Completed(status))
    }

    /// The request failed. The error is recorded on the span; propagating it
    /// stays the caller's business.
    pub fn fail<E>(&self, error: &E) -> bool
    where
        E: fmt::Display + fmt::Debug + ?Sized,
    {
        self.terminate(Outcome::failed(error))
    }

    /// Signals the terminal event. Only the first signal after the span was
    /// started finishes it; every other call returns `false`.
    pub fn terminate(&self, outcome: Outcome) -> bool {
        let Some(record) = self.inner.dispatch.get() else {
            tracing::debug!(
                path = self.inner.request.path(),
                "terminal event before the server span started; ignored"
            );
            return false;
        };
        if !self.inner.completion.claim() {
            tracing::trace!(
                path = self.inner.request.path(),
                ?outcome,
                "request already terminal; ignored"
            );
            return false;
        }
        self.inner
            .tracing
            .on_request_terminal(&self.inner.request, record, self.log_span(), outcome);
        true
    }

    /// The request will never reach a terminal event, e.g. its response body
    /// was dropped unread. `status` is the status of the response head, if
    /// one was produced. The configured abandon policy decides how the span
    /// ends.
    pub(crate) fn abandon(&self, status: Option<StatusCode>) -> bool {
        self.inner.abandon(status)
    }
}

impl Inner {
    fn abandon(&self, status: Option<StatusCode>) -> bool {
        let Some(record) = self.dispatch.get() else {
            return false;
        };
        if !self.completion.claim() {
            return false;
        }
        self.tracing
            .on_request_abandoned(&self.request, record, self.log_span.get(), status);
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.abandon(None);
    }
}
