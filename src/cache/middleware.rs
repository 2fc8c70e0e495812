//! The response cache as a pipeline layer.

use std::sync::Arc;

use super::{Lookup, ResponseCache, ResponseCacheOptions};
use crate::{
    Request,
    context::Context,
    middleware::{BoxFuture, Middleware, Next, RequestPredicate},
};

/// Serves cacheable requests from a [`ResponseCache`] and stores the
/// downstream response on a miss.
///
/// # Behavior
///
/// - Requests matching the `skip` predicate, non-`GET`/`HEAD` requests and
///   requests sent with `Cache-Control: no-cache`/`no-store` pass straight
///   through and carry no `X-Cache` header.
/// - A hit is answered without calling the rest of the chain (`X-Cache: HIT`,
///   `Age`, `ETag`); a matching `If-None-Match` yields `304 Not Modified`.
/// - On a miss the chain runs, cacheable responses are stored, and the
///   response carries `X-Cache: MISS`.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use ephemeris::cache::{ResponseCache, ResponseCacheMiddleware, ResponseCacheOptions};
///
/// let cache = ResponseCache::new();
/// let layer = ResponseCacheMiddleware::new(
///     cache.clone(),
///     ResponseCacheOptions::new().ttl(Duration::from_secs(60)),
/// )
/// .skip(|request| request.path().starts_with("/admin"));
/// ```
pub struct ResponseCacheMiddleware {
    cache: ResponseCache,
    options: Arc<ResponseCacheOptions>,
    skip: Option<RequestPredicate>,
}

impl ResponseCacheMiddleware {
    pub fn new(cache: ResponseCache, options: ResponseCacheOptions) -> Self {
        Self {
            cache,
            options: Arc::new(options),
            skip: None,
        }
    }

    /// Requests for which `predicate` returns `true` bypass the cache.
    #[must_use]
    pub fn skip<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(predicate));
        self
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }
}

impl Middleware for ResponseCacheMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture {
        let cache = self.cache.clone();
        let options = Arc::clone(&self.options);
        let skipped = self.skip.as_ref().is_some_and(|skip| skip(ctx.request()));

        Box::pin(async move {
            if skipped {
                return next.run(ctx).await;
            }
            match cache.lookup(ctx.request(), &options) {
                Lookup::Bypass => next.run(ctx).await,
                Lookup::NotModified(response) | Lookup::Hit(response) => response,
                Lookup::Miss(pending) => {
                    let response = next.run(ctx).await;
                    cache.complete(pending, response, &options)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::http::headers::X_CACHE;
    use crate::middleware::Pipeline;
    use crate::{Method, Response, StatusCode};

    fn counting_pipeline(layer: ResponseCacheMiddleware, calls: Arc<AtomicUsize>) -> Pipeline {
        Pipeline::new().layer(Arc::new(layer)).handler(move |ctx: Context| {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Response::new(StatusCode::Ok).body(format!("{} #{n}", ctx.request().path()))
            }
        })
    }

    fn get(target: &str) -> Context {
        Context::new(Request::new(Method::Get, target))
    }

    #[tokio::test]
    async fn second_request_is_served_from_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let layer = ResponseCacheMiddleware::new(ResponseCache::new(), ResponseCacheOptions::new());
        let pipeline = counting_pipeline(layer, Arc::clone(&calls));

        let first = pipeline.handle(get("/charts")).await;
        let second = pipeline.handle(get("/charts")).await;

        assert_eq!(first.headers().get(X_CACHE), Some("MISS"));
        assert_eq!(second.headers().get(X_CACHE), Some("HIT"));
        assert_eq!(second.body_ref().as_ref(), b"/charts #1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn skip_predicate_bypasses_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let layer = ResponseCacheMiddleware::new(ResponseCache::new(), ResponseCacheOptions::new())
            .skip(|request| request.path().starts_with("/admin"));
        let pipeline = counting_pipeline(layer, Arc::clone(&calls));

        pipeline.handle(get("/admin/users")).await;
        let response = pipeline.handle(get("/admin/users")).await;

        assert!(response.headers().get(X_CACHE).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn writes_are_never_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ResponseCache::new();
        let layer = ResponseCacheMiddleware::new(cache.clone(), ResponseCacheOptions::new());
        let pipeline = counting_pipeline(layer, Arc::clone(&calls));

        let post = || Context::new(Request::new(Method::Post, "/charts"));
        pipeline.handle(post()).await;
        pipeline.handle(post()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.store().is_empty());
    }
}
