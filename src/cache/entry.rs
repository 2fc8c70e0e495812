//! Cache entries and their freshness rules.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;

use super::CachePolicy;

/// Where an entry sits in its lifetime at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// `age <= ttl`.
    Fresh,
    /// `ttl < age <= ttl + stale_window`: still served, but due for a refresh.
    Stale,
}

/// A value read from the store together with how old it is.
#[derive(Debug, Clone)]
pub struct CacheHit<V> {
    pub value: V,
    pub age: Duration,
    pub freshness: Freshness,
}

/// A stored value plus the metadata needed to decide whether it may be served.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry<V> {
    pub(crate) value: V,
    pub(crate) created_at: Instant,
    pub(crate) ttl: Duration,
    pub(crate) stale_window: Option<Duration>,
    pub(crate) tags: HashSet<String>,
}

impl<V> CacheEntry<V> {
    pub(crate) fn new(value: V, policy: &CachePolicy, now: Instant) -> Self {
        Self {
            value,
            created_at: now,
            ttl: policy.ttl(),
            stale_window: policy.stale_window(),
            tags: policy.tags().iter().cloned().collect(),
        }
    }

    pub(crate) fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// `None` once the entry is past `ttl + stale_window` and must be evicted.
    pub(crate) fn freshness(&self, now: Instant) -> Option<Freshness> {
        let age = self.age(now);
        if age <= self.ttl {
            return Some(Freshness::Fresh);
        }
        match self.stale_window {
            Some(window) if age <= self.ttl.saturating_add(window) => Some(Freshness::Stale),
            _ => None,
        }
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.freshness(now).is_none()
    }
}
