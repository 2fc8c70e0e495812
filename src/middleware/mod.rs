//! Middleware pipeline: composable before/after request handler logic.
//!
//! Each middleware wraps the next layer, so request inspection, short-circuit
//! responses (rate limiting, cache hits) and response decoration (diagnostic
//! headers) stay out of the handlers themselves.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to advance.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`Pipeline`]: ordered stack of middleware terminated by a handler.
//! - [`LoggerMiddleware`]: built-in request/response logger.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ephemeris::{Response, StatusCode, context::Context};
//! use ephemeris::middleware::{LoggerMiddleware, Pipeline};
//!
//! # async fn demo(ctx: Context) {
//! let pipeline = Pipeline::new()
//!     .layer(Arc::new(LoggerMiddleware))
//!     .handler(|_ctx: Context| async { Response::new(StatusCode::Ok).body("ok") });
//!
//! let response = pipeline.handle(ctx).await;
//! # }
//! ```

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::{Request, Response, StatusCode, context::Context, http::headers::X_CACHE};

/// A boxed, `Send` future resolving to a [`Response`].
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A type-erased, reference-counted middleware function.
///
/// Every entry in the middleware stack is stored as a `MiddlewareHandler`.
/// Construct one with [`from_middleware`] or [`from_handler`].
pub type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> BoxFuture + Send + Sync + 'static>;

/// A shared request predicate, used for `skip` rules and similar opt-outs.
pub type RequestPredicate = Arc<dyn Fn(&Request) -> bool + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this trait through the blanket impl.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given context, boxing the returned future.
    fn call(&self, ctx: Context) -> BoxFuture;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture {
        Box::pin((self)(ctx))
    }
}

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// Wraps a terminal handler as the last entry of a middleware stack.
///
/// The handler ignores `next`; nothing after it in the stack is reachable.
pub fn from_handler<H>(handler: H) -> MiddlewareHandler
where
    H: IntoHandler,
{
    Arc::new(move |ctx: Context, _next: Next| handler.call(ctx))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed on each call to [`run`](Self::run), so a middleware can
/// forward a request at most once.
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    index: usize,
}

impl Next {
    /// Creates a new `Next` positioned at the start of the given stack.
    pub fn new(middlewares: impl Into<Arc<[MiddlewareHandler]>>) -> Self {
        Self {
            middlewares: middlewares.into(),
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// If the chain is exhausted without producing a response, a
    /// `500 Internal Server Error` is returned as a safe fallback.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = self.middlewares[self.index].clone();
            self.index += 1;
            handler(ctx, self).await
        } else {
            Response::new(StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline")
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors may pass through (`next.run(ctx).await`), short-circuit by
/// returning a [`Response`] without calling `next`, or decorate the response
/// returned by `next`.
///
/// Implementations must be `Send + Sync` (middleware is shared across tasks)
/// and must not hold locks on shared state across an `.await` point.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture;
}

/// An ordered middleware stack terminated by a handler.
///
/// Layers run in the order they were added: the first layer sees the request
/// first and the response last. The handler always runs innermost, whether
/// layers are added before or after it. Cloning a `Pipeline` is cheap.
#[derive(Clone, Default)]
pub struct Pipeline {
    layers: Vec<MiddlewareHandler>,
    handler: Option<MiddlewareHandler>,
    stack: Arc<[MiddlewareHandler]>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware layer.
    #[must_use]
    pub fn layer<M>(self, middleware: Arc<M>) -> Self
    where
        M: Middleware + 'static,
    {
        self.layer_fn(from_middleware(middleware))
    }

    /// Appends an already type-erased layer.
    #[must_use]
    pub fn layer_fn(mut self, handler: MiddlewareHandler) -> Self {
        self.layers.push(handler);
        self.rebuild();
        self
    }

    /// Sets the terminal handler, replacing any previous one.
    #[must_use]
    pub fn handler<H>(mut self, handler: H) -> Self
    where
        H: IntoHandler,
    {
        self.handler = Some(from_handler(handler));
        self.rebuild();
        self
    }

    // Layers in order, then the handler.
    fn rebuild(&mut self) {
        self.stack = self.layers.iter().chain(&self.handler).cloned().collect();
    }

    /// Runs one request through the pipeline.
    ///
    /// Without a terminal handler the chain falls through to the `500`
    /// fallback of [`Next::run`].
    pub async fn handle(&self, ctx: Context) -> Response {
        Next::new(Arc::clone(&self.stack)).run(ctx).await
    }
}

/// Logs each request's method, path, status, cache outcome and duration.
///
/// Emits a single `tracing::info!` record after the downstream chain completes.
/// Place it first in a [`Pipeline`] so the timing covers every other layer.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_string();
            let path = ctx.request().path().to_string();

            let response = next.run(ctx).await;

            let cache = response.headers().get(X_CACHE).unwrap_or("-").to_string();
            tracing::info!(
                %method,
                %path,
                status = response.status().as_u16(),
                cache = %cache,
                elapsed = ?start.elapsed(),
                "request completed"
            );

            response
        })
    }
}
