//! Send-pipeline composition.
//!
//! Middlewares wrap the transport send. They compose right-to-left: the
//! middleware supplied last is the outermost layer and runs its "before"
//! logic first.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use http::{Request, Response};

use crate::body::{ReqBody, ResBody};
use crate::error::TransportError;
use crate::transport::SharedTransport;

pub type SendResult = Result<Response<ResBody>, TransportError>;

pub trait Middleware: Send + Sync {
    fn handle<'a>(&'a self, request: Request<ReqBody>, next: Next<'a>) -> BoxFuture<'a, SendResult>;
}

/// The remainder of the chain below the current middleware.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    transport: &'a SharedTransport,
    middlewares: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub fn run(self, request: Request<ReqBody>) -> BoxFuture<'a, SendResult> {
        match self.middlewares.split_last() {
            Some((outer, inner)) => outer.handle(
                request,
                Next {
                    transport: self.transport,
                    middlewares: inner,
                },
            ),
            None => self.transport.send(request),
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Next")
            .field("remaining", &self.middlewares.len())
            .finish()
    }
}

/// A transport wrapped by an ordered list of middlewares.
pub struct MiddlewareChain {
    transport: SharedTransport,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new(transport: SharedTransport, middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            transport,
            middlewares,
        }
    }

    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub fn send(&self, request: Request<ReqBody>) -> BoxFuture<'_, SendResult> {
        Next {
            transport: &self.transport,
            middlewares: &self.middlewares,
        }
        .run(request)
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MiddlewareChain")
            .field("transport", &self.transport)
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

pub struct FnMiddleware<F> {
    handler: F,
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(Request<ReqBody>, Next<'a>) -> BoxFuture<'a, SendResult> + Send + Sync,
{
    fn handle<'a>(&'a self, request: Request<ReqBody>, next: Next<'a>) -> BoxFuture<'a, SendResult> {
        (self.handler)(request, next)
    }
}

/// Adapts a function into a [`Middleware`].
///
/// ```
/// use futures_util::future::BoxFuture;
/// use http::{HeaderValue, Request};
/// use reqflow::middleware::{Next, SendResult, from_fn};
/// use reqflow::ReqBody;
///
/// fn stamp<'a>(mut request: Request<ReqBody>, next: Next<'a>) -> BoxFuture<'a, SendResult> {
///     request
///         .headers_mut()
///         .insert("x-stamp", HeaderValue::from_static("1"));
///     next.run(request)
/// }
///
/// let _middleware = from_fn(stamp);
/// ```
pub fn from_fn<F>(handler: F) -> Arc<dyn Middleware>
where
    F: for<'a> Fn(Request<ReqBody>, Next<'a>) -> BoxFuture<'a, SendResult> + Send + Sync + 'static,
{
    Arc::new(FnMiddleware { handler })
}
