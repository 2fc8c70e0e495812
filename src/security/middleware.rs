//! Rate limiting as a pipeline layer.

use std::sync::Arc;

use serde::Serialize;
use tracing::{trace, warn};

use super::{FixedWindowLimiter, Quota, RateLimitConfig, RateLimitDecision, RateLimiter};
use crate::{
    Request, Response, StatusCode,
    config::ConfigError,
    context::Context,
    http::headers::{RETRY_AFTER, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET},
    middleware::{BoxFuture, Middleware, Next, RequestPredicate},
};

/// Derives the limiter key for a request.
pub type KeyGenerator = Arc<dyn Fn(&Request) -> String + Send + Sync + 'static>;

/// Best-effort client address: the first `X-Forwarded-For` hop, then
/// `X-Real-IP`, else `"unknown"`. Both headers are client-controlled.
pub fn client_ip(request: &Request) -> String {
    let headers = request.headers();
    headers
        .get("x-forwarded-for")
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| headers.get("x-real-ip").map(str::trim).filter(|ip| !ip.is_empty()))
        .unwrap_or("unknown")
        .to_string()
}

/// The default limiter key: `<client ip>:<path>`.
pub fn default_key(request: &Request) -> String {
    format!("{}:{}", client_ip(request), request.path())
}

#[derive(Serialize)]
struct RejectionBody<'a> {
    error: &'a str,
    #[serde(rename = "retryAfter")]
    retry_after: u64,
}

/// Counts every request against a [`RateLimiter`] and rejects those over
/// quota before they reach the rest of the chain.
///
/// # Behavior
///
/// - Requests matching the `skip` predicate pass through uncounted.
/// - A rejected request gets `429 Too Many Requests` with a JSON body
///   `{"error": <message>, "retryAfter": <seconds>}` and a `Retry-After`
///   header; the downstream chain is **not** called.
/// - An admitted request has its [`RateLimitDecision`] inserted into the
///   context extensions.
/// - Unless disabled, both outcomes carry `X-RateLimit-Limit`,
///   `X-RateLimit-Remaining` and `X-RateLimit-Reset` (Unix seconds).
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use ephemeris::security::{RateLimitConfig, RateLimitMiddleware, SlidingWindowLimiter};
///
/// let chart_limit = RateLimitMiddleware::from_config(&RateLimitConfig::chart())
///     .unwrap()
///     .limiter(Arc::new(SlidingWindowLimiter::new()))
///     .key_generator(|request| request.headers().get("x-user-id").unwrap_or("anonymous").to_string());
/// ```
pub struct RateLimitMiddleware {
    limiter: Arc<dyn RateLimiter>,
    quota: Quota,
    key_generator: KeyGenerator,
    skip: Option<RequestPredicate>,
    message: Arc<str>,
    headers: bool,
}

impl RateLimitMiddleware {
    /// A fixed-window limiter keyed by [`default_key`].
    pub fn new(quota: Quota) -> Self {
        Self {
            limiter: Arc::new(FixedWindowLimiter::new()),
            quota,
            key_generator: Arc::new(default_key),
            skip: None,
            message: Arc::from(super::config::DEFAULT_MESSAGE),
            headers: true,
        }
    }

    /// # Errors
    ///
    /// [`ConfigError::ZeroWindow`] or [`ConfigError::ZeroQuota`].
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.quota()?)
            .message(config.message.as_str())
            .headers(config.headers))
    }

    /// Shares `limiter` instead of a private fixed-window limiter, e.g. to
    /// reset keys from elsewhere.
    #[must_use]
    pub fn limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    #[must_use]
    pub fn key_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.key_generator = Arc::new(generator);
        self
    }

    /// Requests for which `predicate` returns `true` are not counted.
    #[must_use]
    pub fn skip<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(predicate));
        self
    }

    #[must_use]
    pub fn message(mut self, message: impl Into<Arc<str>>) -> Self {
        self.message = message.into();
        self
    }

    #[must_use]
    pub fn headers(mut self, enabled: bool) -> Self {
        self.headers = enabled;
        self
    }

    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    /// The key `request` is counted under.
    pub fn key_for(&self, request: &Request) -> String {
        (self.key_generator)(request)
    }

    /// The current state for `request` without counting it.
    pub fn status(&self, request: &Request) -> RateLimitDecision {
        self.limiter.status(&self.key_for(request), &self.quota)
    }

    /// Gives `request`'s key a full quota again.
    pub fn reset(&self, request: &Request) {
        self.limiter.reset(&self.key_for(request));
    }
}

fn apply_headers(response: &mut Response, decision: &RateLimitDecision) {
    response.set_header(X_RATELIMIT_LIMIT, decision.limit.to_string());
    response.set_header(X_RATELIMIT_REMAINING, decision.remaining.to_string());
    response.set_header(X_RATELIMIT_RESET, decision.reset_unix_secs().to_string());
}

fn rejection(message: &str, decision: &RateLimitDecision, headers: bool) -> Response {
    let retry_after = decision.retry_after_secs().unwrap_or(1);
    let body = RejectionBody {
        error: message,
        retry_after,
    };
    let mut response = match Response::json(StatusCode::TooManyRequests, &body) {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "failed to serialize rate-limit body");
            Response::new(StatusCode::TooManyRequests).body(message.to_string())
        }
    };
    response.set_header(RETRY_AFTER, retry_after.to_string());
    if headers {
        apply_headers(&mut response, decision);
    }
    response
}

impl Middleware for RateLimitMiddleware {
    fn handle(&self, mut ctx: Context, next: Next) -> BoxFuture {
        let skipped = self.skip.as_ref().is_some_and(|skip| skip(ctx.request()));
        if skipped {
            return Box::pin(next.run(ctx));
        }

        let key = self.key_for(ctx.request());
        let decision = self.limiter.consume(&key, &self.quota);

        if !decision.allowed {
            warn!(
                key = %key,
                limit = decision.limit,
                retry_after = ?decision.retry_after,
                "rate limit exceeded"
            );
            let response = rejection(&self.message, &decision, self.headers);
            return Box::pin(async move { response });
        }

        trace!(key = %key, remaining = decision.remaining, "rate limit ok");
        ctx.extensions_mut().insert(decision);
        let headers = self.headers;

        Box::pin(async move {
            let mut response = next.run(ctx).await;
            if headers {
                apply_headers(&mut response, &decision);
            }
            response
        })
    }
}
