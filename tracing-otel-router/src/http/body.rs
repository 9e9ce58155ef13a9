use std::fmt;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use http::StatusCode;
use http_body::{Body, Frame, SizeHint};

use super::context::RequestContext;

/// Fires the request's terminal event once the response has been produced.
///
/// The request completes once the body reports its end, which for an empty
/// body is as soon as it is dropped. A body dropped any earlier was never
/// fully written and the request is abandoned.
struct ResponseCompletion {
    ctx: Option<RequestContext>,
    status: StatusCode,
    end_of_stream: bool,
}

impl ResponseCompletion {
    fn complete(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            ctx.complete(self.status);
        }
    }

    fn fail<E: fmt::Display + fmt::Debug>(&mut self, error: &E) {
        if let Some(ctx) = self.ctx.take() {
            ctx.fail(error);
        }
    }
}

impl Drop for ResponseCompletion {
    fn drop(&mut self) {
        if self.end_of_stream {
            self.complete();
        } else if let Some(ctx) = self.ctx.take() {
            ctx.abandon(Some(self.status));
        }
    }
}

pin_project_lite::pin_project! {
    /// Response body of a traced request.
    pub struct TracedBody<B> {
        #[pin]
        inner: B,
        completion: ResponseCompletion,
    }
}

impl<B> TracedBody<B>
where
    B: Body,
{
    pub(crate) fn new(inner: B, ctx: RequestContext, status: StatusCode) -> Self {
        let end_of_stream = inner.is_end_stream();
        Self {
            inner,
            completion: ResponseCompletion {
                ctx: Some(ctx),
                status,
                end_of_stream,
            },
        }
    }

    /// Body of a rerouted dispatch; the outermost traversal owns completion.
    pub(crate) fn passthrough(inner: B, status: StatusCode) -> Self {
        Self {
            inner,
            completion: ResponseCompletion {
                ctx: None,
                status,
                end_of_stream: false,
            },
        }
    }
}

impl<B> fmt::Debug for TracedBody<B>
where
    B: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedBody")
            .field("inner", &self.inner)
            .field("pending", &self.completion.ctx.is_some())
            .finish()
    }
}

impl<B> Body for TracedBody<B>
where
    B: Body,
    B::Error: fmt::Display + fmt::Debug,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        let result = ready!(this.inner.as_mut().poll_frame(cx));
        match &result {
            None => this.completion.complete(),
            Some(Err(error)) => this.completion.fail(error),
            Some(Ok(_)) if this.inner.is_end_stream() => this.completion.complete(),
            Some(Ok(_)) => {}
        }
        Poll::Ready(result)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
