//! Request rate limiting.
//!
//! - [`RateLimiter`]: the per-key limiter contract, with the
//!   [`FixedWindowLimiter`] and [`SlidingWindowLimiter`] implementations.
//! - [`RateLimitConfig`]: named quota profiles with the application presets.
//! - [`RateLimitMiddleware`]: the limiter as a pipeline layer, answering
//!   over-quota requests with `429 Too Many Requests`.

pub mod config;
pub mod middleware;
pub mod rate_limit;

pub use config::RateLimitConfig;
pub use middleware::{KeyGenerator, RateLimitMiddleware, client_ip, default_key};
pub use rate_limit::{
    FixedWindowLimiter, Quota, RateLimitDecision, RateLimiter, SlidingWindowLimiter,
};
