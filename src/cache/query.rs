//! Cached operations over async producers.

use std::any::{Any, type_name};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::{CacheError, CachePolicy, CacheStatsSnapshot, CacheStore, build_key};

type AnyValue = Arc<dyn Any + Send + Sync>;

/// The cached domains of the application, each with its own key namespace and
/// default tags.
///
/// Every scope is tagged with its domain name and with the owning id, so an
/// update to one user's data can drop all of that user's entries at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    User(&'a str),
    Subscription(&'a str),
    Chart { user_id: &'a str, kind: &'a str },
    Calendar { user_id: &'a str, year: i32 },
}

impl Scope<'_> {
    pub fn key(&self) -> String {
        match *self {
            Scope::User(id) => build_key("user", [("id", id)]),
            Scope::Subscription(id) => build_key("subscription", [("id", id)]),
            Scope::Chart { user_id, kind } => build_key("chart", [("id", user_id), ("kind", kind)]),
            Scope::Calendar { user_id, year } => {
                build_key("calendar", [("id", user_id.to_string()), ("year", year.to_string())])
            }
        }
    }

    pub fn tags(&self) -> Vec<String> {
        match *self {
            Scope::User(id) => vec!["user".into(), user_tag(id)],
            Scope::Subscription(id) => vec!["subscription".into(), subscription_tag(id)],
            Scope::Chart { user_id, kind } => vec![
                "chart".into(),
                chart_tag(user_id),
                chart_kind_tag(user_id, kind),
            ],
            Scope::Calendar { user_id, year } => vec![
                "calendar".into(),
                calendar_tag(user_id),
                calendar_user_year_tag(user_id, year),
                calendar_year_tag(year),
            ],
        }
    }
}

// Tags go through `build_key` so ids are escaped and each tag shape has its
// own parameter names.
fn user_tag(id: &str) -> String {
    build_key("user", [("id", id)])
}

fn subscription_tag(id: &str) -> String {
    build_key("subscription", [("id", id)])
}

fn chart_tag(user_id: &str) -> String {
    build_key("chart", [("id", user_id)])
}

fn chart_kind_tag(user_id: &str, kind: &str) -> String {
    build_key("chart", [("id", user_id), ("kind", kind)])
}

fn calendar_tag(user_id: &str) -> String {
    build_key("calendar", [("id", user_id)])
}

fn calendar_user_year_tag(user_id: &str, year: i32) -> String {
    build_key("calendar", [("id", user_id.to_string()), ("year", year.to_string())])
}

fn calendar_year_tag(year: i32) -> String {
    build_key("calendar", [("year", year)])
}

/// Memoizes async producers in a shared, type-erased store.
///
/// One `QueryCache` can hold values of many types; each lookup asks for the
/// type it expects. Clones share the same store.
///
/// # Examples
///
/// ```
/// use ephemeris::cache::{QueryCache, Scope};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = QueryCache::new();
///
/// let name: Result<String, std::io::Error> = cache
///     .scoped(Scope::User("42"), || async { Ok("Ada".to_string()) })
///     .await;
/// assert_eq!(name.unwrap(), "Ada");
///
/// // Served from cache: the producer is not called again.
/// let again: Result<String, std::io::Error> = cache
///     .scoped(Scope::User("42"), || async { Err(std::io::Error::other("not called")) })
///     .await;
/// assert_eq!(again.unwrap(), "Ada");
///
/// assert_eq!(cache.invalidate_user("42"), 1);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct QueryCache {
    store: CacheStore<AnyValue>,
    policy: CachePolicy,
}

impl QueryCache {
    /// A cache whose scoped helpers use [`CachePolicy::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache whose scoped helpers use `policy` (its tags are added to each
    /// scope's own tags).
    pub fn with_policy(policy: CachePolicy) -> Self {
        Self {
            store: CacheStore::new(),
            policy,
        }
    }

    /// The underlying store, for sweeping and introspection.
    pub fn store(&self) -> &CacheStore<AnyValue> {
        &self.store
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Returns the cached value under `key`, or runs `producer` and caches its
    /// result.
    ///
    /// A fresh or stale entry is returned without calling `producer`. A
    /// producer error is returned unchanged and nothing is cached, so the
    /// next call retries. With [`CachePolicy::skip_cache`] the lookup is
    /// skipped but the new result is still written.
    ///
    /// # Errors
    ///
    /// Whatever `producer` returns.
    pub async fn cached_operation<T, E, F, Fut>(
        &self,
        key: &str,
        policy: &CachePolicy,
        producer: F,
    ) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        if !policy.skip_cache() {
            if let Some(value) = self.get::<T>(key) {
                return Ok(value);
            }
        } else {
            trace!(key = %key, "cache lookup skipped");
        }

        match producer().await {
            Ok(value) => {
                let stored: AnyValue = Arc::new(value.clone());
                self.store.insert(key, stored, policy);
                Ok(value)
            }
            Err(err) => {
                debug!(key = %key, error = %err, "producer failed, nothing cached");
                Err(err)
            }
        }
    }

    /// Reads `key` as a `T`. A value of another type is logged and treated as
    /// absent.
    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let value = self.store.get(key)?;
        match value.downcast::<T>() {
            Ok(value) => Some(T::clone(&value)),
            Err(_) => {
                let err = CacheError::TypeMismatch {
                    key: key.to_string(),
                    expected: type_name::<T>(),
                };
                warn!(error = %err, "treating cache entry as a miss");
                None
            }
        }
    }

    /// [`cached_operation`](Self::cached_operation) under `scope`'s key and
    /// tags with the cache's default policy.
    ///
    /// # Errors
    ///
    /// Whatever `producer` returns.
    pub async fn scoped<T, E, F, Fut>(&self, scope: Scope<'_>, producer: F) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.scoped_with(scope, &self.policy, producer).await
    }

    /// Like [`scoped`](Self::scoped), with an explicit policy; `policy` tags
    /// are added to the scope's tags.
    ///
    /// # Errors
    ///
    /// Whatever `producer` returns.
    pub async fn scoped_with<T, E, F, Fut>(
        &self,
        scope: Scope<'_>,
        policy: &CachePolicy,
        producer: F,
    ) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let policy = policy.clone().with_tags(scope.tags());
        self.cached_operation(&scope.key(), &policy, producer).await
    }

    /// Cached user lookup.
    ///
    /// # Errors
    ///
    /// Whatever `producer` returns.
    pub async fn user<T, E, F, Fut>(&self, user_id: &str, producer: F) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.scoped(Scope::User(user_id), producer).await
    }

    /// Cached subscription lookup.
    ///
    /// # Errors
    ///
    /// Whatever `producer` returns.
    pub async fn subscription<T, E, F, Fut>(&self, user_id: &str, producer: F) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.scoped(Scope::Subscription(user_id), producer).await
    }

    /// Cached chart calculation of the given `kind` (natal, solar return, ...).
    ///
    /// # Errors
    ///
    /// Whatever `producer` returns.
    pub async fn chart<T, E, F, Fut>(&self, user_id: &str, kind: &str, producer: F) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.scoped(Scope::Chart { user_id, kind }, producer).await
    }

    /// Cached yearly calendar.
    ///
    /// # Errors
    ///
    /// Whatever `producer` returns.
    pub async fn calendar<T, E, F, Fut>(&self, user_id: &str, year: i32, producer: F) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.scoped(Scope::Calendar { user_id, year }, producer).await
    }

    /// Drops everything cached for one user.
    pub fn invalidate_user(&self, user_id: &str) -> usize {
        self.store.invalidate_tag(&user_tag(user_id))
    }

    pub fn invalidate_subscription(&self, user_id: &str) -> usize {
        self.store.invalidate_tag(&subscription_tag(user_id))
    }

    /// Drops one chart kind for a user, or all of the user's charts when
    /// `kind` is `None`.
    pub fn invalidate_chart(&self, user_id: &str, kind: Option<&str>) -> usize {
        match kind {
            Some(kind) => self.store.invalidate_tag(&chart_kind_tag(user_id, kind)),
            None => self.store.invalidate_tag(&chart_tag(user_id)),
        }
    }

    /// Drops one year of a user's calendar, or every year when `year` is `None`.
    pub fn invalidate_calendar(&self, user_id: &str, year: Option<i32>) -> usize {
        match year {
            Some(year) => self.store.invalidate_tag(&calendar_user_year_tag(user_id, year)),
            None => self.store.invalidate_tag(&calendar_tag(user_id)),
        }
    }

    /// Drops the given year's calendar for every user.
    pub fn invalidate_calendar_year(&self, year: i32) -> usize {
        self.store.invalidate_tag(&calendar_year_tag(year))
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
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        v: u32,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("upstream unavailable")]
    struct Upstream;

    #[tokio::test(start_paused = true)]
    async fn serves_cached_value_until_ttl_lapses() {
        let cache = QueryCache::new();
        let policy = CachePolicy::new(Duration::from_secs(5));
        let calls = AtomicUsize::new(0);

        let produce = |v: u32| {
            let calls = &calls;
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Upstream>(Payload { v })
            }
        };

        let first = cache.cached_operation("k", &policy, produce(42)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        let second = cache.cached_operation("k", &policy, produce(99)).await.unwrap();
        assert_eq!(first, Payload { v: 42 });
        assert_eq!(second, Payload { v: 42 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(4)).await;
        let third = cache.cached_operation("k", &policy, produce(99)).await.unwrap();
        assert_eq!(third, Payload { v: 99 });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_producer_caches_nothing() {
        let cache = QueryCache::new();
        let policy = CachePolicy::default();

        let err = cache
            .cached_operation::<Payload, _, _, _>("k", &policy, || async { Err(Upstream) })
            .await;
        assert!(err.is_err());
        assert!(cache.store().is_empty());

        let ok = cache
            .cached_operation("k", &policy, || async { Ok::<_, Upstream>(Payload { v: 1 }) })
            .await
            .unwrap();
        assert_eq!(ok.v, 1);
    }

    #[tokio::test]
    async fn skip_cache_recomputes_and_overwrites() {
        let cache = QueryCache::new();
        let policy = CachePolicy::default();
        cache
            .cached_operation("k", &policy, || async { Ok::<_, Upstream>(1u32) })
            .await
            .unwrap();

        let skip = policy.clone().with_skip_cache(true);
        let fresh = cache
            .cached_operation("k", &skip, || async { Ok::<_, Upstream>(2u32) })
            .await
            .unwrap();
        assert_eq!(fresh, 2);

        let cached = cache
            .cached_operation("k", &policy, || async { Ok::<_, Upstream>(3u32) })
            .await
            .unwrap();
        assert_eq!(cached, 2);
    }

    #[tokio::test]
    async fn type_mismatch_is_a_miss() {
        let cache = QueryCache::new();
        let policy = CachePolicy::default();
        cache
            .cached_operation("k", &policy, || async { Ok::<_, Upstream>(7u32) })
            .await
            .unwrap();

        assert_eq!(cache.get::<String>("k"), None);
        let text = cache
            .cached_operation("k", &policy, || async { Ok::<_, Upstream>("seven".to_string()) })
            .await
            .unwrap();
        assert_eq!(text, "seven");
        assert_eq!(cache.get::<String>("k").as_deref(), Some("seven"));
    }

    #[test]
    fn scope_keys_and_tags() {
        let chart = Scope::Chart { user_id: "u1", kind: "natal" };
        assert_eq!(chart.key(), "chart:id=u1&kind=natal");
        assert_eq!(chart.tags(), ["chart", "chart:id=u1", "chart:id=u1&kind=natal"]);

        let calendar = Scope::Calendar { user_id: "u1", year: 2025 };
        assert_eq!(calendar.key(), "calendar:id=u1&year=2025");
        assert_eq!(
            calendar.tags(),
            [
                "calendar",
                "calendar:id=u1",
                "calendar:id=u1&year=2025",
                "calendar:year=2025"
            ]
        );

        assert_ne!(Scope::User("1").key(), Scope::Subscription("1").key());
    }

    #[tokio::test]
    async fn invalidation_helpers_are_scoped() {
        let cache = QueryCache::new();
        let ok = |v: u32| move || async move { Ok::<_, Upstream>(v) };

        cache.user("u1", ok(1)).await.unwrap();
        cache.user("u2", ok(2)).await.unwrap();
        cache.subscription("u1", ok(3)).await.unwrap();
        cache.chart("u1", "natal", ok(4)).await.unwrap();
        cache.chart("u1", "solar", ok(5)).await.unwrap();
        cache.calendar("u1", 2025, ok(6)).await.unwrap();
        cache.calendar("u2", 2025, ok(7)).await.unwrap();
        cache.calendar("u2", 2026, ok(8)).await.unwrap();

        assert_eq!(cache.invalidate_user("u1"), 1);
        assert_eq!(cache.get::<u32>(&Scope::User("u2").key()), Some(2));

        assert_eq!(cache.invalidate_chart("u1", Some("natal")), 1);
        assert_eq!(cache.invalidate_chart("u1", None), 1);

        assert_eq!(cache.invalidate_calendar_year(2025), 2);
        assert_eq!(cache.invalidate_calendar("u2", None), 1);

        assert_eq!(cache.invalidate_subscription("u1"), 1);
        assert_eq!(cache.invalidate_subscription("u1"), 0);
        assert_eq!(cache.store().len(), 1);
    }

    #[tokio::test]
    async fn awkward_user_ids_stay_isolated() {
        let cache = QueryCache::new();
        let ok = |v: u32| move || async move { Ok::<_, Upstream>(v) };

        cache.calendar("alice", 2025, ok(1)).await.unwrap();
        cache.calendar("bob", 2025, ok(2)).await.unwrap();
        cache.calendar("year", 2025, ok(3)).await.unwrap();
        assert_eq!(cache.invalidate_calendar("year", Some(2025)), 1);
        assert_eq!(cache.get::<u32>(&Scope::Calendar { user_id: "alice", year: 2025 }.key()), Some(1));

        cache.chart("a", "b", ok(4)).await.unwrap();
        cache.chart("a:b", "natal", ok(5)).await.unwrap();
        assert_eq!(cache.invalidate_chart("a:b", None), 1);
        assert_eq!(cache.get::<u32>(&Scope::Chart { user_id: "a", kind: "b" }.key()), Some(4));

        cache.user("1&id=2", ok(6)).await.unwrap();
        cache.user("2", ok(7)).await.unwrap();
        assert_eq!(cache.invalidate_user("2"), 1);
        assert_eq!(cache.get::<u32>(&Scope::User("1&id=2").key()), Some(6));
    }

    #[tokio::test]
    async fn policy_tags_are_added_to_scope_tags() {
        let cache = QueryCache::with_policy(CachePolicy::default().with_tag("tenant:a"));
        cache
            .user("u1", || async { Ok::<_, Upstream>(1u8) })
            .await
            .unwrap();

        assert_eq!(cache.invalidate_tags(["tenant:a"]), 1);
    }
}
