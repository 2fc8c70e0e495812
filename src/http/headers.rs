//! HTTP header map with case-insensitive name lookup.
//!
//! Also defines the names of the diagnostic headers the acceleration layer
//! attaches to responses.

use std::fmt;

/// `HIT` or `MISS`, depending on whether the response came from the cache.
pub const X_CACHE: &str = "X-Cache";
/// Seconds since a cached response was stored.
pub const AGE: &str = "Age";
pub const ETAG: &str = "ETag";
pub const IF_NONE_MATCH: &str = "If-None-Match";
pub const CACHE_CONTROL: &str = "Cache-Control";
pub const X_RATELIMIT_LIMIT: &str = "X-RateLimit-Limit";
pub const X_RATELIMIT_REMAINING: &str = "X-RateLimit-Remaining";
/// Unix timestamp (seconds) at which the current rate-limit window closes.
pub const X_RATELIMIT_RESET: &str = "X-RateLimit-Reset";
/// Seconds to wait before retrying. Only sent on rejection.
pub const RETRY_AFTER: &str = "Retry-After";

/// A case-insensitive, multi-value HTTP header map.
///
/// Preserves insertion order and allows multiple values per header name.
///
/// # Examples
///
/// ```
/// use ephemeris::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Cache-Control", "public, max-age=60");
/// headers.set("X-Cache", "MISS");
/// headers.set("x-cache", "HIT");
///
/// assert_eq!(headers.get("x-cache"), Some("HIT"));
/// assert!(headers.has_directive("cache-control", "max-age"));
/// assert!(!headers.has_directive("cache-control", "no-store"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a header map with pre-allocated capacity for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Appends a header entry. Multiple values for the same name are preserved.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Replaces every existing value for `name` with a single new value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.inner.push((name, value.into()));
    }

    /// Returns the first value for the given header name (case-insensitive), or `None`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns an iterator over all values for the given header name (case-insensitive).
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.inner
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes all entries with the given header name (case-insensitive).
    ///
    /// Returns `true` if any entries were removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.inner.len();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.inner.len() < before
    }

    /// Returns `true` if the map contains at least one entry with the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Returns `true` if any value of a comma-separated directive header
    /// (`Cache-Control`, `Pragma`, ...) carries `directive`.
    ///
    /// Directive names compare case-insensitively and ignore any `=value` part,
    /// so `max-age` matches `max-age=60`.
    pub fn has_directive(&self, name: &str, directive: &str) -> bool {
        self.get_all(name)
            .flat_map(|value| value.split(','))
            .map(|token| token.split('=').next().unwrap_or("").trim())
            .any(|token| token.eq_ignore_ascii_case(directive))
    }

    /// Returns the total number of header entries (not unique names).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no header entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over all `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}
