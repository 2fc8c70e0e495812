//! # ephemeris
//!
//! In-process request acceleration: a tagged TTL cache with a
//! stale-while-revalidate window, cached operations over async producers,
//! HTTP response caching with ETags, and per-key rate limiting, composed as
//! middleware in front of a handler.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use ephemeris::cache::{ResponseCache, ResponseCacheMiddleware, ResponseCacheOptions};
//! use ephemeris::context::Context;
//! use ephemeris::middleware::{LoggerMiddleware, Pipeline};
//! use ephemeris::security::{Quota, RateLimitMiddleware};
//! use ephemeris::{Method, Request, Response, StatusCode};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = ResponseCache::new();
//! let pipeline = Pipeline::new()
//!     .layer(Arc::new(LoggerMiddleware))
//!     .layer(Arc::new(RateLimitMiddleware::new(Quota::per_minute(100)?)))
//!     .layer(Arc::new(ResponseCacheMiddleware::new(
//!         cache.clone(),
//!         ResponseCacheOptions::new().ttl(Duration::from_secs(60)),
//!     )))
//!     .handler(|_ctx: Context| async {
//!         Response::new(StatusCode::Ok).body("Mercury is retrograde")
//!     });
//!
//! let request = || Context::new(Request::new(Method::Get, "/forecast"));
//! assert_eq!(pipeline.handle(request()).await.headers().get("x-cache"), Some("MISS"));
//! assert_eq!(pipeline.handle(request()).await.headers().get("x-cache"), Some("HIT"));
//!
//! cache.invalidate_route("/forecast");
//! assert_eq!(pipeline.handle(request()).await.headers().get("x-cache"), Some("MISS"));
//! # Ok(())
//! # }
//! ```

// ── Core request types ───────────────────────────────────────────────────────
pub mod context;
pub mod http;
pub mod middleware;

// ── Acceleration layers ──────────────────────────────────────────────────────
pub mod cache;
pub mod config;
pub mod security;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheError, CachePolicy, CacheStore, QueryCache, ResponseCache};
pub use config::{AccelConfig, ConfigError};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use security::{Quota, RateLimitMiddleware, RateLimiter};
