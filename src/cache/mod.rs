//! Caching layer: a tagged, in-memory TTL store and the wrappers built on it.
//!
//! Everything here is built on one generic [`CacheStore`], parameterized per
//! write by a [`CachePolicy`] (TTL, tags, optional stale-while-revalidate
//! window):
//!
//! - [`QueryCache`]: "cached operation" over an async producer, with
//!   per-domain [`Scope`]s.
//! - [`ResponseCache`]: HTTP response caching with ETag / `If-None-Match`.
//! - [`ResponseCacheMiddleware`]: the response cache as a pipeline layer.
//! - [`key`]: deterministic key derivation.
//!
//! Entries expire lazily on read; [`CacheStore::spawn_sweeper`] optionally
//! bounds memory by purging expired entries periodically. Nothing is persisted.

use thiserror::Error;

pub mod config;
pub mod entry;
pub mod key;
pub mod middleware;
pub mod policy;
pub mod query;
pub mod response;
pub mod stats;
pub mod store;

pub use config::CacheConfig;
pub use entry::{CacheHit, Freshness};
pub use key::{KeyBuilder, build_key, request_key};
pub use middleware::ResponseCacheMiddleware;
pub use policy::{CachePolicy, DEFAULT_TTL};
pub use query::{QueryCache, Scope};
pub use response::{CachedResponse, Lookup, PendingEntry, ResponseCache, ResponseCacheOptions};
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use store::{CacheStore, NO_TAGS};

/// Errors raised by the caching layer.
///
/// None of these ever reach a request as a failure: the wrappers log them and
/// fall back to treating the lookup as a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to serialize key parameter `{name}`: {source}")]
    KeyParam {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid key pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("entry `{key}` does not hold a value of type {expected}")]
    TypeMismatch { key: String, expected: &'static str },
}
