use crate::future::ResponseFuture;
use crate::interceptor::Rewriter;
use http::{Method, Request};
use http_body::Body;
use std::task::{Context, Poll};
use tower::Service;

/// A Tower service that rewrites HTTP response bodies.
#[derive(Debug, Clone)]
pub struct RewriteService<S> {
    inner: S,
    rewriter: Rewriter,
}

impl<S> RewriteService<S> {
    /// Creates a new rewrite service wrapping the given inner service.
    pub fn new(inner: S, rewriter: Rewriter) -> Self {
        Self { inner, rewriter }
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Returns the rewrite settings applied to responses.
    pub fn rewriter(&self) -> &Rewriter {
        &self.rewriter
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RewriteService<S>
where
    S: Service<Request<ReqBody>, Response = http::Response<ResBody>>,
    ResBody: Body,
    ResBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = http::Response<crate::body::RewriteBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // HEAD responses carry no body to rewrite
        let is_head = *req.method() == Method::HEAD;

        let inner = self.inner.call(req);

        ResponseFuture::new(inner, self.rewriter.clone(), is_head)
    }
}
