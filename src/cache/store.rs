//! The tagged TTL store.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::entry::{CacheEntry, CacheHit};
use super::{CacheError, CachePolicy, CacheStats, CacheStatsSnapshot};
use crate::config::ConfigError;

/// An empty tag list, for [`CacheStore::set`] calls that need none.
pub const NO_TAGS: [&str; 0] = [];

// Entries and the tag index always change together under one lock.
struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    tags: HashMap<String, HashSet<String>>,
}

impl<V> Inner<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            tags: HashMap::new(),
        }
    }

    // Removes `key` from the entries and from every tag set it belongs to,
    // pruning tag sets that become empty.
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        for tag in &entry.tags {
            if let Some(keys) = self.tags.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
        Some(entry)
    }

    fn insert(&mut self, key: String, entry: CacheEntry<V>) {
        self.remove(&key);
        for tag in &entry.tags {
            self.tags.entry(tag.clone()).or_default().insert(key.clone());
        }
        self.entries.insert(key, entry);
    }

    // Removes `keys`, returning (live, expired) counts.
    fn remove_all<'a, I>(&mut self, keys: I, now: Instant) -> (usize, usize)
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut removed = 0;
        let mut expired = 0;
        for key in keys {
            match self.remove(key) {
                Some(entry) if entry.is_expired(now) => expired += 1,
                Some(_) => removed += 1,
                None => {}
            }
        }
        (removed, expired)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }
}

/// A process-local key → value store with TTLs, tags and an optional
/// stale-while-revalidate window per entry.
///
/// `CacheStore` is a handle: clones share the same entries, so build one at
/// startup and pass clones to every consumer. Each operation holds the
/// internal lock for its whole duration and never awaits while holding it.
///
/// Expired entries are evicted lazily when read, invalidated, or swept.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ephemeris::cache::CacheStore;
///
/// let store: CacheStore<String> = CacheStore::new();
/// store.set("user:1", "Ada".to_string(), Duration::from_secs(60), ["user", "user:1"]);
///
/// assert_eq!(store.get("user:1").as_deref(), Some("Ada"));
/// assert_eq!(store.invalidate_tag("user:1"), 1);
/// assert_eq!(store.get("user:1"), None);
/// ```
pub struct CacheStore<V> {
    inner: Arc<Mutex<Inner<V>>>,
    stats: Arc<CacheStats>,
}

impl<V> Clone for CacheStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<V> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> CacheStore<V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new())),
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Stores `value` under `key`, replacing any previous entry and its tags.
    pub fn set<I>(&self, key: impl Into<String>, value: V, ttl: Duration, tags: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let policy = CachePolicy::new(ttl).with_tags(tags);
        self.insert(key, value, &policy);
    }

    /// Stores `value` under `key` according to `policy`.
    ///
    /// A zero TTL stores nothing, but still drops whatever was cached under
    /// `key` before: the write describes an entry that is already expired.
    pub fn insert(&self, key: impl Into<String>, value: V, policy: &CachePolicy) {
        let key = key.into();
        let mut inner = self.inner.lock();

        if policy.ttl().is_zero() {
            inner.remove(&key);
            debug!(key = %key, "zero ttl, entry not stored");
            return;
        }

        let entry = CacheEntry::new(value, policy, Instant::now());
        trace!(key = %key, ttl = ?policy.ttl(), tags = ?policy.tags(), "cache set");
        inner.insert(key, entry);
        self.stats.record_set();
    }

    /// Removes `key`. Returns `false` if it was absent or already expired.
    pub fn delete(&self, key: &str) -> bool {
        let now = Instant::now();
        let removed = self.inner.lock().remove(key);
        match removed {
            Some(entry) if !entry.is_expired(now) => {
                self.stats.record_deletes(1);
                true
            }
            Some(_) => {
                self.stats.record_expirations(1);
                false
            }
            None => {
                debug!(key = %key, "delete of missing key");
                false
            }
        }
    }

    /// Removes every live entry tagged `tag` and returns how many there were.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        self.invalidate_tags([tag])
    }

    /// Removes every live entry carrying any of `tags`.
    ///
    /// The count is of distinct keys: an entry under two of the tags is
    /// removed and counted once. Expired entries found along the way are
    /// evicted without being counted.
    pub fn invalidate_tags<I>(&self, tags: I) -> usize
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let mut keys = HashSet::new();
        for tag in tags {
            let tag = tag.as_ref();
            match inner.tags.get(tag) {
                Some(tagged) => keys.extend(tagged.iter().cloned()),
                None => debug!(tag = %tag, "invalidation of unknown tag"),
            }
        }

        let (removed, expired) = inner.remove_all(&keys, now);
        drop(inner);

        self.stats.record_deletes(removed as u64);
        self.stats.record_expirations(expired as u64);
        if removed > 0 {
            debug!(removed, "tag invalidation");
        }
        removed
    }

    /// Removes every live entry whose key matches the glob `pattern`, where
    /// `*` matches any run of characters and everything else is literal.
    ///
    /// # Errors
    ///
    /// [`CacheError::Pattern`] if the pattern is too large to compile.
    pub fn invalidate_matching(&self, pattern: &str) -> Result<usize, CacheError> {
        let regex = glob_regex(pattern).map_err(|source| CacheError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(self.invalidate_where(|key| regex.is_match(key)))
    }

    /// Removes every live entry whose key satisfies `predicate`, counted like
    /// [`invalidate_tags`](Self::invalidate_tags).
    pub fn invalidate_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let keys: Vec<String> = inner
            .entries
            .keys()
            .filter(|key| predicate(key.as_str()))
            .cloned()
            .collect();
        let (removed, expired) = inner.remove_all(&keys, now);
        drop(inner);

        self.stats.record_deletes(removed as u64);
        self.stats.record_expirations(expired as u64);
        if removed > 0 {
            debug!(removed, "key invalidation");
        }
        removed
    }

    /// Drops every entry and the whole tag index in one step.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.tags.clear();
    }

    /// Evicts every entry past `ttl + stale_window`. Returns how many.
    pub fn purge_expired(&self) -> usize {
        let purged = self.inner.lock().purge_expired(Instant::now());
        self.stats.record_expirations(purged as u64);
        purged
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` holds a servable (fresh or stale) entry. Does not touch
    /// the hit/miss counters.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        self.inner
            .lock()
            .tags
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let entries = self.len();
        self.stats.snapshot(entries)
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }
}

fn glob_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let literal: Vec<String> = pattern.split('*').map(regex::escape).collect();
    Regex::new(&format!("(?s)^{}$", literal.join(".*")))
}

impl<V: Clone> CacheStore<V> {
    /// Returns the value under `key` if it is fresh or within its stale window.
    ///
    /// An entry past `ttl + stale_window` is evicted and reported as absent.
    pub fn get(&self, key: &str) -> Option<V> {
        self.lookup(key).map(|hit| hit.value)
    }

    /// Like [`get`](Self::get), but also reports the entry's age and freshness.
    pub fn lookup(&self, key: &str) -> Option<CacheHit<V>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let Some(entry) = inner.entries.get(key) else {
            drop(inner);
            self.stats.record_miss();
            trace!(key = %key, "cache miss");
            return None;
        };

        match entry.freshness(now) {
            Some(freshness) => {
                let hit = CacheHit {
                    value: entry.value.clone(),
                    age: entry.age(now),
                    freshness,
                };
                drop(inner);
                self.stats.record_hit();
                trace!(key = %key, ?freshness, "cache hit");
                Some(hit)
            }
            None => {
                inner.remove(key);
                drop(inner);
                self.stats.record_expirations(1);
                self.stats.record_miss();
                trace!(key = %key, "cache entry expired");
                None
            }
        }
    }
}

impl<V: Send + 'static> CacheStore<V> {
    /// Spawns a task that calls [`purge_expired`](Self::purge_expired) every
    /// `period`. The task ends on its own once every handle to the store has
    /// been dropped; abort the returned handle to stop it sooner.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ZeroSweepInterval`] if `period` is zero.
    pub fn spawn_sweeper(&self, period: Duration) -> Result<JoinHandle<()>, ConfigError> {
        if period.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }
        let inner: Weak<Mutex<Inner<V>>> = Arc::downgrade(&self.inner);
        let stats = Arc::clone(&self.stats);

        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    debug!("cache dropped, sweeper exiting");
                    break;
                };
                let purged = inner.lock().purge_expired(Instant::now());
                stats.record_expirations(purged as u64);
                if purged > 0 {
                    debug!(purged, "swept expired cache entries");
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    impl<V> CacheStore<V> {
        // Every key in every tag set must exist in the store.
        fn assert_tag_index_consistent(&self) {
            let inner = self.inner.lock();
            for (tag, keys) in &inner.tags {
                assert!(!keys.is_empty(), "empty tag set for {tag} was not pruned");
                for key in keys {
                    let entry = inner.entries.get(key).unwrap_or_else(|| {
                        panic!("tag {tag} references missing key {key}")
                    });
                    assert!(entry.tags.contains(tag));
                }
            }
        }
    }

    #[test]
    fn set_get_delete() {
        let store = CacheStore::new();
        store.set("a", 1, MINUTE, NO_TAGS);
        assert_eq!(store.get("a"), Some(1));
        assert!(store.delete("a"));
        assert!(!store.delete("a"));
        assert_eq!(store.get("a"), None);
    }

    #[test]
    fn overwrite_replaces_tags() {
        let store = CacheStore::new();
        store.set("k", "v1", MINUTE, ["old"]);
        store.set("k", "v2", MINUTE, ["new"]);

        assert_eq!(store.get("k"), Some("v2"));
        assert!(store.keys_for_tag("old").is_empty());
        assert_eq!(store.keys_for_tag("new"), vec!["k".to_string()]);
        assert_eq!(store.invalidate_tag("old"), 0);
        store.assert_tag_index_consistent();
    }

    #[test]
    fn zero_ttl_is_a_no_op_that_drops_the_old_entry() {
        let store = CacheStore::new();
        store.set("k", 1, MINUTE, ["t"]);
        store.set("k", 2, Duration::ZERO, ["t"]);

        assert_eq!(store.get("k"), None);
        assert!(store.is_empty());
        assert!(store.keys_for_tag("t").is_empty());
        assert_eq!(store.stats().sets, 1);
    }

    #[test]
    fn invalidate_tag_only_touches_tagged_keys() {
        let store = CacheStore::new();
        store.set("u1", 1, MINUTE, ["user", "user:1"]);
        store.set("u2", 2, MINUTE, ["user", "user:2"]);
        store.set("c1", 3, MINUTE, ["chart"]);

        assert_eq!(store.invalidate_tag("user:1"), 1);
        assert_eq!(store.get("u1"), None);
        assert_eq!(store.get("u2"), Some(2));

        assert_eq!(store.invalidate_tag("user"), 1);
        assert_eq!(store.get("c1"), Some(3));
        assert_eq!(store.invalidate_tag("nope"), 0);
        store.assert_tag_index_consistent();
    }

    #[test]
    fn multi_tag_invalidation_counts_distinct_keys() {
        let store = CacheStore::new();
        store.set("both", 1, MINUTE, ["a", "b"]);
        store.set("only-a", 2, MINUTE, ["a"]);
        store.set("only-b", 3, MINUTE, ["b"]);
        store.set("other", 4, MINUTE, ["c"]);

        assert_eq!(store.invalidate_tags(["a", "b"]), 3);
        assert_eq!(store.len(), 1);
        assert_eq!(store.stats().deletes, 3);
        store.assert_tag_index_consistent();
    }

    #[test]
    fn glob_invalidation_matches_whole_keys() {
        let store = CacheStore::new();
        store.set("user:1", 1, MINUTE, ["user", "user:1"]);
        store.set("user:2", 2, MINUTE, ["user"]);
        store.set("chart:user:1", 3, MINUTE, ["chart"]);
        store.set("user.x", 4, MINUTE, NO_TAGS);

        assert_eq!(store.invalidate_matching("user:*").unwrap(), 2);
        assert_eq!(store.get("chart:user:1"), Some(3));
        assert_eq!(store.get("user.x"), Some(4));
        assert!(store.keys_for_tag("user").is_empty());
        store.assert_tag_index_consistent();

        assert_eq!(store.invalidate_matching("chart:user:1").unwrap(), 1);
        assert_eq!(store.invalidate_matching("*").unwrap(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn predicate_invalidation_skips_expired_in_count() {
        let store = CacheStore::new();
        store.set("a:1", 1, Duration::from_secs(1), ["t"]);
        store.set("a:2", 2, MINUTE, ["t"]);
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.invalidate_where(|key| key.starts_with("a:")), 1);
        assert!(store.is_empty());
        assert_eq!(store.stats().expirations, 1);
        store.assert_tag_index_consistent();
    }

    #[test]
    fn clear_drops_entries_and_tags() {
        let store = CacheStore::new();
        store.set("a", 1, MINUTE, ["t"]);
        store.set("b", 2, MINUTE, ["t", "u"]);
        store.clear();

        assert!(store.is_empty());
        assert!(store.keys_for_tag("t").is_empty());
        assert_eq!(store.invalidate_tag("u"), 0);
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let store = CacheStore::new();
        store.set("a", 1, MINUTE, NO_TAGS);
        store.get("a");
        store.get("a");
        store.get("b");

        let stats = store.stats();
        assert_eq!((stats.hits, stats.misses, stats.sets), (2, 1, 1));
        store.reset_stats();
        assert_eq!(store.stats().hits, 0);
        assert_eq!(store.get("a"), Some(1));
    }

    #[test]
    fn clones_share_state() {
        let store = CacheStore::new();
        let handle = store.clone();
        handle.set("shared", 7, MINUTE, NO_TAGS);
        assert_eq!(store.get("shared"), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let store = CacheStore::new();
        store.set("k", 1, Duration::from_secs(5), ["t"]);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.get("k"), Some(1));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(store.get("k"), None);
        assert!(store.is_empty(), "expired entry is evicted on read");
        assert!(store.keys_for_tag("t").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entries_are_served_within_window() {
        let store = CacheStore::new();
        let policy = CachePolicy::new(Duration::from_secs(5)).with_stale_window(Duration::from_secs(10));
        store.insert("k", "v", &policy);

        tokio::time::advance(Duration::from_secs(8)).await;
        let hit = store.lookup("k").unwrap();
        assert_eq!(hit.freshness, crate::cache::Freshness::Stale);
        assert_eq!(hit.age, Duration::from_secs(8));

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(store.lookup("k").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_do_not_count_toward_invalidation() {
        let store = CacheStore::new();
        store.set("short", 1, Duration::from_secs(1), ["t"]);
        store.set("long", 2, Duration::from_secs(60), ["t"]);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.invalidate_tag("t"), 1);
        assert!(store.is_empty());
        assert_eq!(store.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_of_expired_entry_reports_absent() {
        let store = CacheStore::new();
        store.set("k", 1, Duration::from_secs(1), NO_TAGS);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.delete("k"));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_removes_only_dead_entries() {
        let store = CacheStore::new();
        store.set("a", 1, Duration::from_secs(1), ["t"]);
        store.set("b", 2, Duration::from_secs(1), ["t"]);
        store.set("c", 3, Duration::from_secs(30), ["t"]);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 2);
        assert_eq!(store.keys(), vec!["c".to_string()]);
        store.assert_tag_index_consistent();
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_periodically() {
        let store = CacheStore::new();
        store.set("a", 1, Duration::from_secs(1), NO_TAGS);
        let sweeper = store.spawn_sweeper(Duration::from_secs(10)).unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(store.len(), 0);
        assert_eq!(store.stats().expirations, 1);

        sweeper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_exits_when_store_dropped() {
        let store: CacheStore<u8> = CacheStore::new();
        let sweeper = store.spawn_sweeper(Duration::from_secs(1)).unwrap();
        drop(store);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(sweeper.await.is_ok());
    }

    #[test]
    fn zero_sweep_period_is_rejected() {
        let store: CacheStore<u8> = CacheStore::new();
        assert!(matches!(
            store.spawn_sweeper(Duration::ZERO),
            Err(ConfigError::ZeroSweepInterval)
        ));
    }
}
