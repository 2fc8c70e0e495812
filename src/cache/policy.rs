//! Per-write caching policy.

use std::time::Duration;

/// TTL used when no other policy is configured (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// How long an entry lives, how it is grouped, and whether the read path is
/// bypassed.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ephemeris::cache::CachePolicy;
///
/// let policy = CachePolicy::new(Duration::from_secs(60))
///     .with_stale_window(Duration::from_secs(30))
///     .with_tags(["chart", "chart:42"]);
///
/// assert_eq!(policy.max_age(), Duration::from_secs(90));
/// assert_eq!(policy.tags(), ["chart", "chart:42"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    ttl: Duration,
    stale_window: Option<Duration>,
    tags: Vec<String>,
    skip_cache: bool,
}

impl CachePolicy {
    /// A policy with the given TTL, no tags and no stale window.
    ///
    /// A zero TTL turns writes into no-ops.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            stale_window: None,
            tags: Vec::new(),
            skip_cache: false,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Keeps serving the entry for `window` after its TTL lapses.
    #[must_use]
    pub fn with_stale_window(mut self, window: Duration) -> Self {
        self.stale_window = Some(window);
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn with_tags<I>(mut self, tags: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Skips the lookup but still writes the fresh result back, for explicit
    /// "recalculate" actions.
    #[must_use]
    pub fn with_skip_cache(mut self, skip: bool) -> Self {
        self.skip_cache = skip;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stale_window(&self) -> Option<Duration> {
        self.stale_window
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn skip_cache(&self) -> bool {
        self.skip_cache
    }

    /// TTL plus the stale window: the age beyond which an entry is gone.
    pub fn max_age(&self) -> Duration {
        self.ttl.saturating_add(self.stale_window.unwrap_or_default())
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
