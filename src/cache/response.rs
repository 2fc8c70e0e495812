//! HTTP response caching with ETags and conditional requests.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, trace, warn};

use super::{CacheError, CachePolicy, CacheStatsSnapshot, CacheStore, request_key};
use crate::http::headers::{AGE, CACHE_CONTROL, ETAG, IF_NONE_MATCH, X_CACHE};
use crate::http::{Headers, Method, Request, Response, StatusCode};

/// A response as stored in the cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Bytes,
    pub etag: String,
}

impl CachedResponse {
    /// Captures `response`, keeping its own `ETag` if it has one and deriving
    /// one from the body otherwise.
    pub fn from_response(response: &Response) -> Self {
        let etag = response
            .headers()
            .get(ETAG)
            .map(str::to_string)
            .unwrap_or_else(|| etag_for_bytes(response.body_ref()));

        let mut headers = response.headers().clone();
        headers.remove(X_CACHE);
        headers.remove(AGE);
        headers.set(ETAG, etag.clone());

        Self {
            status: response.status(),
            headers,
            body: response.body_ref().clone(),
            etag,
        }
    }

    /// Replays the stored response as a cache hit `age` old.
    pub fn to_response(&self, age: Duration) -> Response {
        let mut response = Response::new(self.status).body_bytes(self.body.clone());
        *response.headers_mut() = self.headers.clone();
        response.set_header(X_CACHE, "HIT");
        response.set_header(AGE, age.as_secs().to_string());
        response
    }

    fn not_modified(&self, age: Duration) -> Response {
        Response::new(StatusCode::NotModified)
            .header(ETAG, self.etag.clone())
            .header(X_CACHE, "HIT")
            .header(AGE, age.as_secs().to_string())
    }
}

/// A strong ETag derived from the SHA-256 digest of `body`.
///
/// ```
/// use ephemeris::cache::response::etag_for_bytes;
///
/// let etag = etag_for_bytes(b"{\"sun\":\"leo\"}");
/// assert!(etag.starts_with('"') && etag.ends_with('"'));
/// assert_eq!(etag, etag_for_bytes(b"{\"sun\":\"leo\"}"));
/// assert_ne!(etag, etag_for_bytes(b"{\"sun\":\"virgo\"}"));
/// ```
pub fn etag_for_bytes(body: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(body));
    format!("\"{}\"", &digest[..32])
}

/// Whether an `If-None-Match` header value matches `etag`.
///
/// Handles `*`, comma-separated lists and weak (`W/`) validators, using weak
/// comparison as conditional GETs allow.
pub fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    let strip = |tag: &str| tag.trim().trim_start_matches("W/").to_string();
    let etag = strip(etag);
    if_none_match
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || strip(candidate) == etag)
}

/// Only `GET` and `HEAD` requests without `no-cache`/`no-store` are served
/// from or written to the cache.
pub fn is_cacheable_request(request: &Request) -> bool {
    request.method().is_cacheable()
        && !request.headers().has_directive(CACHE_CONTROL, "no-cache")
        && !request.headers().has_directive(CACHE_CONTROL, "no-store")
}

/// Only 2xx responses without `no-store`/`private` are stored.
pub fn is_cacheable_response(response: &Response) -> bool {
    response.status().is_success()
        && !response.headers().has_directive(CACHE_CONTROL, "no-store")
        && !response.headers().has_directive(CACHE_CONTROL, "private")
}

/// Per-route response caching options.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ephemeris::cache::ResponseCacheOptions;
///
/// let options = ResponseCacheOptions::new()
///     .namespace("charts")
///     .ttl(Duration::from_secs(60))
///     .stale_window(Duration::from_secs(30))
///     .vary("Accept-Language")
///     .with_cache_control(true);
///
/// assert_eq!(
///     options.cache_control().as_deref(),
///     Some("public, max-age=60, stale-while-revalidate=30"),
/// );
/// ```
#[derive(Debug, Clone)]
pub struct ResponseCacheOptions {
    namespace: String,
    policy: CachePolicy,
    vary_headers: Vec<String>,
    cache_control: bool,
}

impl Default for ResponseCacheOptions {
    fn default() -> Self {
        Self {
            namespace: "http".to_string(),
            policy: CachePolicy::default(),
            vary_headers: Vec::new(),
            cache_control: false,
        }
    }
}

impl ResponseCacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key prefix, so routes sharing a path can still be cached apart.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.policy = self.policy.with_ttl(ttl);
        self
    }

    #[must_use]
    pub fn stale_window(mut self, window: Duration) -> Self {
        self.policy = self.policy.with_stale_window(window);
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.policy = self.policy.with_tag(tag);
        self
    }

    /// Adds a request header whose value partitions the cache.
    #[must_use]
    pub fn vary(mut self, header: impl Into<String>) -> Self {
        self.vary_headers.push(header.into());
        self
    }

    /// Adds a `Cache-Control` header derived from the policy to stored
    /// responses that do not set their own.
    #[must_use]
    pub fn with_cache_control(mut self, enabled: bool) -> Self {
        self.cache_control = enabled;
        self
    }

    pub fn cache_policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// The `Cache-Control` value advertised for stored responses, if enabled.
    pub fn cache_control(&self) -> Option<String> {
        if !self.cache_control {
            return None;
        }
        let max_age = self.policy.ttl().as_secs();
        Some(match self.policy.stale_window() {
            Some(window) => format!(
                "public, max-age={max_age}, stale-while-revalidate={}",
                window.as_secs()
            ),
            None => format!("public, max-age={max_age}"),
        })
    }

    fn key_for(&self, request: &Request) -> String {
        let vary: Vec<&str> = self.vary_headers.iter().map(String::as_str).collect();
        request_key(&self.namespace, request, &vary)
    }
}

/// A slot reserved by a cache miss, to be filled by [`ResponseCache::complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    key: String,
    route: String,
}

impl PendingEntry {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Outcome of [`ResponseCache::lookup`].
#[derive(Debug)]
pub enum Lookup {
    /// The request must not touch the cache; run the handler as is.
    Bypass,
    /// The client's `If-None-Match` matches the cached ETag.
    NotModified(Response),
    Hit(Response),
    Miss(PendingEntry),
}

fn route_tag(path: &str) -> String {
    format!("route:{path}")
}

/// Caches whole HTTP responses keyed by method, path, query and vary headers.
///
/// Every stored response is tagged `route:<path>` in addition to the
/// policy's tags, so [`invalidate_route`](Self::invalidate_route) drops all
/// query variants of a path at once.
///
/// # Examples
///
/// ```
/// use ephemeris::cache::{ResponseCache, ResponseCacheOptions};
/// use ephemeris::http::{Method, Request, Response, StatusCode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = ResponseCache::new();
/// let options = ResponseCacheOptions::new();
/// let request = Request::new(Method::Get, "/horoscope/leo");
///
/// let first = cache
///     .respond(&request, &options, || async { Response::new(StatusCode::Ok).body("bright") })
///     .await;
/// assert_eq!(first.headers().get("x-cache"), Some("MISS"));
///
/// let second = cache
///     .respond(&request, &options, || async { Response::new(StatusCode::Ok).body("dim") })
///     .await;
/// assert_eq!(second.headers().get("x-cache"), Some("HIT"));
/// assert_eq!(second.body_ref().as_ref(), b"bright");
/// # }
/// ```
#[derive(Clone, Default)]
pub struct ResponseCache {
    store: CacheStore<CachedResponse>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &CacheStore<CachedResponse> {
        &self.store
    }

    /// Consults the cache for `request` without running any handler.
    pub fn lookup(&self, request: &Request, options: &ResponseCacheOptions) -> Lookup {
        if !is_cacheable_request(request) {
            trace!(path = %request.path(), "request not cacheable");
            return Lookup::Bypass;
        }

        let key = options.key_for(request);
        if options.policy.skip_cache() {
            return Lookup::Miss(PendingEntry {
                key,
                route: request.path().to_string(),
            });
        }

        match self.store.lookup(&key) {
            Some(hit) => {
                let not_modified = request
                    .headers()
                    .get(IF_NONE_MATCH)
                    .is_some_and(|tags| etag_matches(tags, &hit.value.etag));
                if not_modified {
                    debug!(key = %key, "conditional request matched, 304");
                    Lookup::NotModified(hit.value.not_modified(hit.age))
                } else {
                    Lookup::Hit(hit.value.to_response(hit.age))
                }
            }
            None => Lookup::Miss(PendingEntry {
                key,
                route: request.path().to_string(),
            }),
        }
    }

    /// Stores the handler's `response` for a previous miss if it is
    /// cacheable, and marks it `X-Cache: MISS`.
    pub fn complete(
        &self,
        pending: PendingEntry,
        mut response: Response,
        options: &ResponseCacheOptions,
    ) -> Response {
        if is_cacheable_response(&response) {
            if let Some(value) = options.cache_control() {
                if !response.headers().contains(CACHE_CONTROL) {
                    response.set_header(CACHE_CONTROL, value);
                }
            }
            let cached = CachedResponse::from_response(&response);
            response.set_header(ETAG, cached.etag.clone());

            let policy = options.policy.clone().with_tag(route_tag(&pending.route));
            self.store.insert(pending.key, cached, &policy);
        } else {
            debug!(
                key = %pending.key,
                status = response.status().as_u16(),
                "response not cacheable"
            );
        }
        response.set_header(X_CACHE, "MISS");
        response
    }

    /// Serves `request` from the cache, or runs `handler` and caches what it
    /// returns.
    pub async fn respond<F, Fut>(
        &self,
        request: &Request,
        options: &ResponseCacheOptions,
        handler: F,
    ) -> Response
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Response>,
    {
        match self.lookup(request, options) {
            Lookup::Bypass => handler().await,
            Lookup::NotModified(response) | Lookup::Hit(response) => response,
            Lookup::Miss(pending) => {
                let response = handler().await;
                self.complete(pending, response, options)
            }
        }
    }

    /// Like [`respond`](Self::respond) for a producer of serializable data,
    /// answered as `200` JSON.
    ///
    /// A value that fails to serialize is logged and answered with an
    /// uncached `500`.
    ///
    /// # Errors
    ///
    /// Whatever `producer` returns; nothing is cached in that case.
    pub async fn respond_json<T, E, F, Fut>(
        &self,
        request: &Request,
        options: &ResponseCacheOptions,
        producer: F,
    ) -> Result<Response, E>
    where
        T: Serialize,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let pending = match self.lookup(request, options) {
            Lookup::NotModified(response) | Lookup::Hit(response) => return Ok(response),
            Lookup::Bypass => None,
            Lookup::Miss(pending) => Some(pending),
        };

        let value = producer().await.map_err(|err| {
            debug!(path = %request.path(), error = %err, "producer failed, nothing cached");
            err
        })?;

        let response = match Response::json(StatusCode::Ok, &value) {
            Ok(response) => response,
            Err(err) => {
                warn!(path = %request.path(), error = %err, "failed to serialize response body");
                return Ok(Response::new(StatusCode::InternalServerError).body("Internal Server Error"));
            }
        };

        Ok(match pending {
            Some(pending) => self.complete(pending, response, options),
            None => response,
        })
    }

    /// Drops every cached variant of `path`.
    pub fn invalidate_route(&self, path: &str) -> usize {
        self.store.invalidate_tag(&route_tag(path))
    }

    /// Drops the cached variants of `path?query` under `options`' namespace,
    /// for `GET` and `HEAD` and every vary header value, leaving the path's
    /// other queries cached. Parameter order in `query` does not matter.
    pub fn invalidate_route_query(
        &self,
        path: &str,
        query: &str,
        options: &ResponseCacheOptions,
    ) -> usize {
        let target = if query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{query}")
        };
        // Key components are escaped, so the vary segment is all that can follow.
        let prefixes: Vec<String> = [Method::Get, Method::Head]
            .into_iter()
            .map(|method| request_key(&options.namespace, &Request::new(method, &target), &[]))
            .collect();
        self.store
            .invalidate_where(|key| prefixes.iter().any(|prefix| key.starts_with(prefix.as_str())))
    }

    /// Drops every entry whose key matches the glob `pattern` (`*` matches
    /// anything), e.g. `"charts:GET:/user/*"`.
    ///
    /// # Errors
    ///
    /// [`CacheError::Pattern`] if the pattern is too large to compile.
    pub fn invalidate_matching(&self, pattern: &str) -> Result<usize, CacheError> {
        self.store.invalidate_matching(pattern)
    }

    pub fn invalidate_tags<I>(&self, tags: I) -> usize
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.store.invalidate_tags(tags)
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.store.stats()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn get(target: &str) -> Request {
        Request::new(Method::Get, target)
    }

    fn ok(body: &'static str) -> Response {
        Response::new(StatusCode::Ok).body(body)
    }

    #[test]
    fn etag_matching() {
        assert!(etag_matches("\"abc\"", "\"abc\""));
        assert!(etag_matches("W/\"abc\"", "\"abc\""));
        assert!(etag_matches("\"x\", \"abc\"", "\"abc\""));
        assert!(etag_matches("*", "\"abc\""));
        assert!(!etag_matches("\"abd\"", "\"abc\""));
    }

    #[test]
    fn request_cacheability() {
        assert!(is_cacheable_request(&get("/")));
        assert!(is_cacheable_request(&Request::new(Method::Head, "/")));
        assert!(!is_cacheable_request(&Request::new(Method::Post, "/")));
        assert!(!is_cacheable_request(&get("/").header("Cache-Control", "no-cache")));
        assert!(!is_cacheable_request(&get("/").header("Cache-Control", "max-age=0, no-store")));
    }

    #[test]
    fn response_cacheability() {
        assert!(is_cacheable_response(&ok("x")));
        assert!(!is_cacheable_response(&Response::new(StatusCode::NotFound)));
        assert!(!is_cacheable_response(&Response::new(StatusCode::Found)));
        assert!(!is_cacheable_response(&ok("x").header("Cache-Control", "private")));
        assert!(!is_cacheable_response(&ok("x").header("Cache-Control", "no-store")));
    }

    #[tokio::test]
    async fn hit_after_miss_without_rerunning_handler() {
        let cache = ResponseCache::new();
        let options = ResponseCacheOptions::new();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let handler = || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            ok("payload")
        };

        let miss = cache.respond(&get("/a"), &options, handler).await;
        let hit = cache.respond(&get("/a"), &options, handler).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(miss.headers().get(X_CACHE), Some("MISS"));
        assert_eq!(hit.headers().get(X_CACHE), Some("HIT"));
        assert_eq!(hit.headers().get(AGE), Some("0"));
        assert_eq!(hit.body_ref(), miss.body_ref());
        assert_eq!(hit.headers().get(ETAG), miss.headers().get(ETAG));
    }

    #[tokio::test]
    async fn matching_if_none_match_yields_304() {
        let cache = ResponseCache::new();
        let options = ResponseCacheOptions::new();
        let first = cache.respond(&get("/a"), &options, || async { ok("payload") }).await;
        let etag = first.headers().get(ETAG).unwrap().to_string();

        let conditional = get("/a").header("If-None-Match", etag.clone());
        let response = cache
            .respond(&conditional, &options, || async { Response::new(StatusCode::InternalServerError) })
            .await;

        assert_eq!(response.status(), StatusCode::NotModified);
        assert!(response.body_ref().is_empty());
        assert_eq!(response.headers().get(ETAG), Some(etag.as_str()));

        let stale_tag = get("/a").header("If-None-Match", "\"other\"");
        let response = cache.respond(&stale_tag, &options, || async { ok("new") }).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.body_ref().as_ref(), b"payload");
    }

    #[tokio::test]
    async fn handler_etag_is_kept() {
        let cache = ResponseCache::new();
        let options = ResponseCacheOptions::new();
        let response = cache
            .respond(&get("/a"), &options, || async { ok("x").header("ETag", "\"v7\"") })
            .await;
        assert_eq!(response.headers().get_all(ETAG).collect::<Vec<_>>(), ["\"v7\""]);

        match cache.lookup(&get("/a").header("If-None-Match", "\"v7\""), &options) {
            Lookup::NotModified(_) => {}
            other => panic!("expected 304, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn uncacheable_responses_are_not_stored() {
        let cache = ResponseCache::new();
        let options = ResponseCacheOptions::new();
        let response = cache
            .respond(&get("/missing"), &options, || async { Response::new(StatusCode::NotFound) })
            .await;

        assert_eq!(response.headers().get(X_CACHE), Some("MISS"));
        assert!(cache.store().is_empty());
    }

    #[tokio::test]
    async fn post_bypasses_cache() {
        let cache = ResponseCache::new();
        let options = ResponseCacheOptions::new();
        let request = Request::new(Method::Post, "/a");
        let response = cache.respond(&request, &options, || async { ok("created") }).await;

        assert!(response.headers().get(X_CACHE).is_none());
        assert!(cache.store().is_empty());
    }

    #[tokio::test]
    async fn vary_headers_partition_entries() {
        let cache = ResponseCache::new();
        let options = ResponseCacheOptions::new().vary("Accept-Language");

        let en = get("/a").header("Accept-Language", "en");
        let fr = get("/a").header("Accept-Language", "fr");
        cache.respond(&en, &options, || async { ok("hello") }).await;
        let response = cache.respond(&fr, &options, || async { ok("bonjour") }).await;

        assert_eq!(response.headers().get(X_CACHE), Some("MISS"));
        assert_eq!(cache.store().len(), 2);
    }

    #[tokio::test]
    async fn invalidate_route_drops_all_query_variants() {
        let cache = ResponseCache::new();
        let options = ResponseCacheOptions::new();
        cache.respond(&get("/charts?page=1"), &options, || async { ok("1") }).await;
        cache.respond(&get("/charts?page=2"), &options, || async { ok("2") }).await;
        cache.respond(&get("/calendar"), &options, || async { ok("c") }).await;

        assert_eq!(cache.invalidate_route("/charts"), 2);
        assert_eq!(cache.store().len(), 1);
    }

    #[tokio::test]
    async fn invalidate_route_query_drops_one_variant() {
        let cache = ResponseCache::new();
        let options = ResponseCacheOptions::new().vary("Accept-Language");
        let en = |target: &str| get(target).header("Accept-Language", "en");
        cache.respond(&get("/charts?page=1&size=10"), &options, || async { ok("1") }).await;
        cache.respond(&en("/charts?page=1&size=10"), &options, || async { ok("1en") }).await;
        cache.respond(&get("/charts?page=1"), &options, || async { ok("1s") }).await;
        cache.respond(&get("/charts?page=2"), &options, || async { ok("2") }).await;
        cache.respond(&get("/charts"), &options, || async { ok("all") }).await;

        assert_eq!(cache.invalidate_route_query("/charts", "size=10&page=1", &options), 2);
        assert_eq!(cache.store().len(), 3);
        assert_eq!(cache.invalidate_route_query("/charts", "", &options), 1);
        assert_eq!(cache.invalidate_route_query("/calendar", "page=2", &options), 0);

        let hit = cache.respond(&get("/charts?page=2"), &options, || async { ok("new") }).await;
        assert_eq!(hit.headers().get("x-cache"), Some("HIT"));
    }

    #[tokio::test]
    async fn invalidate_matching_uses_globs() {
        let cache = ResponseCache::new();
        let options = ResponseCacheOptions::new();
        cache.respond(&get("/user/1"), &options, || async { ok("u1") }).await;
        cache.respond(&get("/user/2?full=1"), &options, || async { ok("u2") }).await;
        cache.respond(&get("/users"), &options, || async { ok("all") }).await;

        assert_eq!(cache.invalidate_matching("http:GET:/user/*").unwrap(), 2);
        assert_eq!(cache.store().len(), 1);
        assert_eq!(cache.invalidate_matching("http:GET:/user/*").unwrap(), 0);
    }

    #[tokio::test]
    async fn repeated_query_params_are_cached_apart() {
        let cache = ResponseCache::new();
        let options = ResponseCacheOptions::new();
        cache
            .respond(&get("/charts?id=1&id=2"), &options, || async { ok("ids 1 and 2") })
            .await;

        let single = cache.respond(&get("/charts?id=2"), &options, || async { ok("id 2") }).await;
        assert_eq!(single.headers().get("x-cache"), Some("MISS"));
        assert_eq!(single.body_ref().as_ref(), b"id 2");
    }

    #[tokio::test]
    async fn respond_json_caches_serialized_values() {
        let cache = ResponseCache::new();
        let options = ResponseCacheOptions::new().with_cache_control(true);
        let value: BTreeMap<&str, u32> = [("v", 42)].into();

        let first = cache
            .respond_json(&get("/v"), &options, || async move { Ok::<_, std::io::Error>(value) })
            .await
            .unwrap();
        assert_eq!(first.body_ref().as_ref(), br#"{"v":42}"#);
        assert_eq!(first.headers().get("content-type"), Some("application/json"));
        assert_eq!(first.headers().get(CACHE_CONTROL), Some("public, max-age=300"));

        let second = cache
            .respond_json(&get("/v"), &options, || async {
                Err::<BTreeMap<&str, u32>, _>(std::io::Error::other("not called"))
            })
            .await
            .unwrap();
        assert_eq!(second.headers().get(X_CACHE), Some("HIT"));
    }

    #[tokio::test]
    async fn respond_json_serialization_failure_is_an_uncached_500() {
        let cache = ResponseCache::new();
        let options = ResponseCacheOptions::new();
        let mut bad = BTreeMap::new();
        bad.insert((1, 2), "x");

        let response = cache
            .respond_json(&get("/bad"), &options, || async move { Ok::<_, std::io::Error>(bad) })
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::InternalServerError);
        assert!(cache.store().is_empty());
    }

    #[tokio::test]
    async fn respond_json_propagates_producer_errors() {
        let cache = ResponseCache::new();
        let options = ResponseCacheOptions::new();
        let result = cache
            .respond_json(&get("/e"), &options, || async {
                Err::<u32, _>(std::io::Error::other("db down"))
            })
            .await;
        assert!(result.is_err());
        assert!(cache.store().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_window_serves_after_ttl() {
        let cache = ResponseCache::new();
        let options = ResponseCacheOptions::new()
            .ttl(Duration::from_secs(10))
            .stale_window(Duration::from_secs(20));
        cache.respond(&get("/a"), &options, || async { ok("old") }).await;

        tokio::time::advance(Duration::from_secs(25)).await;
        let stale = cache.respond(&get("/a"), &options, || async { ok("new") }).await;
        assert_eq!(stale.body_ref().as_ref(), b"old");
        assert_eq!(stale.headers().get(AGE), Some("25"));

        tokio::time::advance(Duration::from_secs(10)).await;
        let fresh = cache.respond(&get("/a"), &options, || async { ok("new") }).await;
        assert_eq!(fresh.body_ref().as_ref(), b"new");
    }
}
