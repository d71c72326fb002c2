//! Tower middleware applying the limiter to a request handler.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::Request;
use tower::{BoxError, Layer, Service};

use crate::body::Body;
use crate::config::LimiterConfig;
use crate::limit::buffer::pause_body;
use crate::limit::limiter::{Canceller, ConcurrencyLimiter, Permit};

/// Applies [`ConcurrencyLimit`] to a service.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimitLayer {
    limiter: ConcurrencyLimiter,
}

impl ConcurrencyLimitLayer {
    /// Create a new layer with its own limiter.
    pub fn new(limit: usize) -> Self {
        Self {
            limiter: ConcurrencyLimiter::new(limit),
        }
    }

    pub fn from_config(config: &LimiterConfig) -> Self {
        Self::with_limiter(ConcurrencyLimiter::from_config(config))
    }

    /// Share an existing limiter, e.g. to inspect it.
    pub fn with_limiter(limiter: ConcurrencyLimiter) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for ConcurrencyLimitLayer {
    type Service = ConcurrencyLimit<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConcurrencyLimit {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// Runs at most `limit` handler invocations at once; the rest wait in
/// arrival order.
///
/// A handler holds its slot from invocation until its response future
/// completes, fails, panics or is dropped. Streaming request bodies of
/// waiting requests are buffered and replayed once the handler starts.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimit<S> {
    inner: S,
    limiter: ConcurrencyLimiter,
}

impl<S> ConcurrencyLimit<S> {
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S> Service<Request<Body>> for ConcurrencyLimit<S>
where
    S: Service<Request<Body>> + Clone + 'static,
    S::Error: Into<BoxError>,
    S::Future: 'static,
    S::Response: 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = ResponseFuture<S::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        if let Some(permit) = self.limiter.try_acquire() {
            // a panic in `call` unwinds through `permit` and frees the slot
            let future = self.inner.call(request);
            return ResponseFuture::running(permit, future);
        }

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let (request, resume) = pause_body(request);
        let (ticket, canceller) = self.limiter.enqueue();

        let future = async move {
            let permit = ticket.await?;
            let future = inner.call(request);
            if let Some(resume) = resume {
                resume.resume();
            }
            let output = future.await.map_err(Into::into);
            drop(permit);
            output
        };

        ResponseFuture {
            inner: Box::pin(future),
            canceller: Some(canceller),
        }
    }
}

/// Response future of [`ConcurrencyLimit`].
pub struct ResponseFuture<T> {
    inner: Pin<Box<dyn Future<Output = Result<T, BoxError>>>>,
    canceller: Option<Canceller>,
}

impl<T: 'static> ResponseFuture<T> {
    fn running<F, E>(permit: Permit, future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + 'static,
        E: Into<BoxError>,
    {
        let future = async move {
            let output = future.await.map_err(Into::into);
            drop(permit);
            output
        };
        Self {
            inner: Box::pin(future),
            canceller: None,
        }
    }
}

impl<T> ResponseFuture<T> {
    /// Handle that cancels this request while it is still queued.
    ///
    /// `None` when the handler started immediately.
    pub fn canceller(&self) -> Option<Canceller> {
        self.canceller.clone()
    }

    /// Whether the request is waiting for a slot.
    pub fn is_queued(&self) -> bool {
        self.canceller.as_ref().is_some_and(Canceller::is_queued)
    }
}

impl<T> Future for ResponseFuture<T> {
    type Output = Result<T, BoxError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}
