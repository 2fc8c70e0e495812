//! Per-key request rate limiting.
//!
//! Two [`RateLimiter`] implementations share one contract:
//!
//! - [`FixedWindowLimiter`]: a counter per key that resets when its window
//!   lapses. Cheap, but a client can fit up to `2 * max` requests around a
//!   window boundary.
//! - [`SlidingWindowLimiter`]: a log of request instants per key, allowing at
//!   most `max` requests in any span of `window`.
//!
//! Both keep their state in a [`DashMap`], whose per-shard entry lock makes
//! each `consume` atomic for its key without a global lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

use crate::config::ConfigError;

/// How many requests a key may make per window.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ephemeris::security::Quota;
///
/// let quota = Quota::new(Duration::from_secs(60), 100).unwrap();
/// assert_eq!(quota.max_requests(), 100);
/// assert!(Quota::new(Duration::ZERO, 100).is_err());
/// assert!(Quota::per_minute(0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    window: Duration,
    max_requests: u32,
}

impl Quota {
    /// # Errors
    ///
    /// [`ConfigError::ZeroWindow`] or [`ConfigError::ZeroQuota`].
    pub fn new(window: Duration, max_requests: u32) -> Result<Self, ConfigError> {
        if window.is_zero() {
            return Err(ConfigError::ZeroWindow);
        }
        if max_requests == 0 {
            return Err(ConfigError::ZeroQuota);
        }
        Ok(Self {
            window,
            max_requests,
        })
    }

    /// # Errors
    ///
    /// [`ConfigError::ZeroQuota`] if `max_requests` is zero.
    pub fn per_minute(max_requests: u32) -> Result<Self, ConfigError> {
        Self::new(Duration::from_secs(60), max_requests)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }
}

// About 30 years; stands in for windows too long to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn window_end(start: Instant, window: Duration) -> Instant {
    start
        .checked_add(window)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// The outcome of one rate-limit check, with everything needed for the
/// `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the current window closes (fixed) or the oldest counted request
    /// leaves the window (sliding).
    pub reset_at: Instant,
    /// Set only on rejection.
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    fn unlimited(quota: &Quota, now: Instant) -> Self {
        Self {
            allowed: true,
            limit: quota.max_requests,
            remaining: quota.max_requests,
            reset_at: window_end(now, quota.window),
            retry_after: None,
        }
    }

    /// `Retry-After` in whole seconds, rounded up and never below 1.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|wait| {
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            secs.max(1)
        })
    }

    /// `reset_at` as a Unix timestamp in seconds.
    pub fn reset_unix_secs(&self) -> u64 {
        let until_reset = self.reset_at.saturating_duration_since(Instant::now());
        let now = SystemTime::now();
        now.checked_add(until_reset)
            .unwrap_or(now)
            .duration_since(UNIX_EPOCH)
            .map(|since_epoch| since_epoch.as_secs())
            .unwrap_or_default()
    }
}

/// A per-key request limiter.
///
/// Implementations are shared across tasks and must make `consume` atomic per
/// key.
pub trait RateLimiter: Send + Sync {
    /// Counts one request for `key` and decides whether it may proceed.
    fn consume(&self, key: &str, quota: &Quota) -> RateLimitDecision;

    /// Reports the state of `key` without counting a request.
    fn status(&self, key: &str, quota: &Quota) -> RateLimitDecision;

    /// Forgets `key`, giving it a full quota again.
    fn reset(&self, key: &str);

    /// Forgets every key.
    fn clear(&self);

    /// Drops state whose window has fully lapsed. Returns how many keys.
    fn purge_expired(&self) -> usize;

    /// Number of keys currently tracked.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u32,
    reset_at: Instant,
}

impl WindowCounter {
    fn decision(&self, quota: &Quota, now: Instant) -> RateLimitDecision {
        let allowed = self.count <= quota.max_requests;
        RateLimitDecision {
            allowed,
            limit: quota.max_requests,
            remaining: quota.max_requests.saturating_sub(self.count),
            reset_at: self.reset_at,
            retry_after: (!allowed).then(|| self.reset_at.saturating_duration_since(now)),
        }
    }
}

/// Fixed-window counter per key.
///
/// The first request for a key, or the first after its window has lapsed,
/// opens a new window of `quota.window()` with a count of 1. The count of an
/// earlier window never carries over.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ephemeris::security::{FixedWindowLimiter, Quota, RateLimiter};
///
/// let limiter = FixedWindowLimiter::new();
/// let quota = Quota::new(Duration::from_secs(1), 2).unwrap();
///
/// assert!(limiter.consume("1.2.3.4:/login", &quota).allowed);
/// assert!(limiter.consume("1.2.3.4:/login", &quota).allowed);
/// assert!(!limiter.consume("1.2.3.4:/login", &quota).allowed);
/// assert!(limiter.consume("5.6.7.8:/login", &quota).allowed);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FixedWindowLimiter {
    counters: Arc<DashMap<String, WindowCounter>>,
}

impl FixedWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn consume(&self, key: &str, quota: &Quota) -> RateLimitDecision {
        let now = Instant::now();
        let fresh = WindowCounter {
            count: 1,
            reset_at: window_end(now, quota.window),
        };

        let counter = match self.counters.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let counter = occupied.get_mut();
                if now > counter.reset_at {
                    *counter = fresh;
                } else {
                    counter.count = counter.count.saturating_add(1);
                }
                *counter
            }
            Entry::Vacant(vacant) => *vacant.insert(fresh),
        };

        counter.decision(quota, now)
    }

    fn status(&self, key: &str, quota: &Quota) -> RateLimitDecision {
        let now = Instant::now();
        match self.counters.get(key) {
            Some(counter) if now <= counter.reset_at => counter.decision(quota, now),
            _ => RateLimitDecision::unlimited(quota, now),
        }
    }

    fn reset(&self, key: &str) {
        self.counters.remove(key);
    }

    fn clear(&self) {
        self.counters.clear();
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, counter| now <= counter.reset_at);
        before.saturating_sub(self.counters.len())
    }

    fn len(&self) -> usize {
        self.counters.len()
    }
}

#[derive(Debug)]
struct SlidingLog {
    window: Duration,
    hits: VecDeque<Instant>,
}

impl SlidingLog {
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    fn decision(&self, quota: &Quota, now: Instant, allowed: bool) -> RateLimitDecision {
        let reset_at = self
            .hits
            .front()
            .map_or(window_end(now, quota.window), |&oldest| window_end(oldest, quota.window));
        let used = u32::try_from(self.hits.len()).unwrap_or(u32::MAX);
        RateLimitDecision {
            allowed,
            limit: quota.max_requests,
            remaining: quota.max_requests.saturating_sub(used),
            reset_at,
            retry_after: (!allowed).then(|| reset_at.saturating_duration_since(now)),
        }
    }
}

/// Sliding-log limiter: at most `max` requests in any span of `window`.
///
/// Rejected requests are not logged, so a client that keeps retrying is
/// admitted again as soon as its oldest counted request ages out.
#[derive(Debug, Clone, Default)]
pub struct SlidingWindowLimiter {
    logs: Arc<DashMap<String, SlidingLog>>,
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn consume(&self, key: &str, quota: &Quota) -> RateLimitDecision {
        let now = Instant::now();
        let mut log = self.logs.entry(key.to_string()).or_insert_with(|| SlidingLog {
            window: quota.window,
            hits: VecDeque::new(),
        });
        log.window = quota.window;
        log.prune(now);

        let max = usize::try_from(quota.max_requests).unwrap_or(usize::MAX);
        let allowed = log.hits.len() < max;
        if allowed {
            log.hits.push_back(now);
        }
        log.decision(quota, now, allowed)
    }

    fn status(&self, key: &str, quota: &Quota) -> RateLimitDecision {
        let now = Instant::now();
        match self.logs.get(key) {
            Some(log) => {
                let live: VecDeque<Instant> = log
                    .hits
                    .iter()
                    .copied()
                    .filter(|&hit| now.saturating_duration_since(hit) < quota.window)
                    .collect();
                let view = SlidingLog {
                    window: quota.window,
                    hits: live,
                };
                let used = view.hits.len();
                let allowed = used <= usize::try_from(quota.max_requests).unwrap_or(usize::MAX);
                view.decision(quota, now, allowed)
            }
            None => RateLimitDecision::unlimited(quota, now),
        }
    }

    fn reset(&self, key: &str) {
        self.logs.remove(key);
    }

    fn clear(&self) {
        self.logs.clear();
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.logs.len();
        self.logs.retain(|_, log| {
            log.prune(now);
            !log.hits.is_empty()
        });
        before.saturating_sub(self.logs.len())
    }

    fn len(&self) -> usize {
        self.logs.len()
    }
}
