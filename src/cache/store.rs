// In-memory response cache.
// Bounded TTL store with lazy expiry on read and oldest-first eviction on overflow.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use tokio::time::Instant;
use tracing::debug;

use super::key::key_path;

/// Default TTL for cached GET responses: 5 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default maximum number of entries before eviction kicks in.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Smallest TTL accepted, keeps `expires_at > created_at`.
const MIN_TTL: Duration = Duration::from_millis(1);

/// A cached value with its lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(key: String, value: V, ttl: Duration) -> Self {
        let created_at = Instant::now();
        Self {
            key,
            value,
            created_at,
            expires_at: created_at + ttl.max(MIN_TTL),
        }
    }

    /// An entry is logically absent from its expiry instant onward.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Age of the oldest entry.
    pub oldest_age: Option<Duration>,
    /// Age of the newest entry.
    pub newest_age: Option<Duration>,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct CacheInner<V> {
    /// Insertion order is eviction order.
    entries: IndexMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
}

impl<V> CacheInner<V> {
    fn evict_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }
}

/// Thread-safe TTL cache keyed by string.
#[derive(Debug)]
pub struct ResponseCache<V> {
    inner: Mutex<CacheInner<V>>,
    default_ttl: Duration,
    max_entries: usize,
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: IndexMap::new(),
                hits: 0,
                misses: 0,
            }),
            default_ttl,
            max_entries: max_entries.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a value if present and unexpired. A stale entry is dropped.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.lock();

        let expired = match inner.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let value = entry.value.clone();
                inner.hits += 1;
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.entries.shift_remove(key);
        }
        inner.misses += 1;
        None
    }

    /// Insert or overwrite a value. `None` uses the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let entry = CacheEntry::new(key.clone(), value, ttl.unwrap_or(self.default_ttl));
        let mut inner = self.lock();

        // Overwrites count as new insertions for eviction order
        inner.entries.shift_remove(&key);
        inner.entries.insert(key, entry);

        if inner.entries.len() > self.max_entries {
            let evicted = inner.evict_expired(Instant::now());
            let mut dropped = 0;
            while inner.entries.len() > self.max_entries {
                inner.entries.shift_remove_index(0);
                dropped += 1;
            }
            debug!(expired = evicted, oldest = dropped, "Cache over capacity, evicted");
        }
    }

    /// Remove one entry. Returns whether it existed.
    pub fn delete(&self, key: &str) -> bool {
        self.lock().entries.shift_remove(key).is_some()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Remove all expired entries. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        self.lock().evict_expired(Instant::now())
    }

    /// Remove every entry whose path starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|key, _| !key_path(key).starts_with(prefix));
        before - inner.entries.len()
    }

    /// Whether a live entry exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let inner = self.lock();
        let ages = inner
            .entries
            .values()
            .map(|entry| now.saturating_duration_since(entry.created_at));

        CacheStats {
            size: inner.entries.len(),
            max_size: self.max_entries,
            hits: inner.hits,
            misses: inner.misses,
            oldest_age: ages.clone().max(),
            newest_age: ages.min(),
        }
    }

    /// Cache-through helper.
    ///
    /// Returns the cached value for `key` unless `force_refresh` is set,
    /// otherwise runs `fetcher` and caches its successful result.
    pub async fn wrap<F, Fut, E>(
        &self,
        key: &str,
        fetcher: F,
        ttl: Option<Duration>,
        force_refresh: bool,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if !force_refresh {
            if let Some(cached) = self.get(key) {
                return Ok(cached);
            }
        }

        let value = fetcher().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_set_then_get() {
        let cache = ResponseCache::default();
        cache.set("test-key", "bar".to_string(), None);
        assert_eq!(cache.get("test-key"), Some("bar".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = ResponseCache::default();
        cache.set("test-key", 42, Some(Duration::from_millis(100)));
        assert_eq!(cache.get("test-key"), Some(42));

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.get("test-key"), None);
        // Stale entry was dropped lazily
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_and_clear() {
        let cache = ResponseCache::default();
        cache.set("key1", "value1", None);
        cache.set("key2", "value2", None);

        assert!(cache.delete("key1"));
        assert!(!cache.delete("key1"));
        assert_eq!(cache.get("key1"), None);
        assert_eq!(cache.get("key2"), Some("value2"));

        cache.clear();
        assert_eq!(cache.get("key2"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_expired_keeps_live_entries() {
        let cache = ResponseCache::default();
        cache.set("long", "value1", Some(Duration::from_millis(5000)));
        cache.set("short", "value2", Some(Duration::from_millis(100)));

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.get("long"), Some("value1"));
        assert_eq!(cache.get("short"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_evicts_oldest_insertion() {
        let cache = ResponseCache::new(DEFAULT_TTL, 2);
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        // Rewriting "a" makes "b" the oldest
        cache.set("a", 10, None);
        cache.set("c", 3, None);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_prefers_expired_entries() {
        let cache = ResponseCache::new(DEFAULT_TTL, 2);
        cache.set("old-live", 1, None);
        cache.set("short", 2, Some(Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.set("new", 3, None);

        assert_eq!(cache.get("old-live"), Some(1));
        assert_eq!(cache.get("new"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_is_immediately_stale() {
        let cache = ResponseCache::default();
        cache.set("k", 1, Some(Duration::ZERO));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_prefix() {
        let cache = ResponseCache::default();
        cache.set("/v1/media?page=1", 1, None);
        cache.set("/v1/media/abc", 2, None);
        cache.set("/v1/users", 3, None);

        assert_eq!(cache.invalidate_prefix("/v1/media"), 2);
        assert_eq!(cache.get("/v1/users"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrap_calls_fetcher_once_unless_forced() {
        let cache: ResponseCache<String> = ResponseCache::default();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>("test".to_string())
        };

        assert_eq!(cache.wrap("test-wrap", fetch, None, false).await, Ok("test".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(cache.wrap("test-wrap", fetch, None, false).await, Ok("test".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(cache.wrap("test-wrap", fetch, None, true).await, Ok("test".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrap_does_not_cache_errors() {
        let cache: ResponseCache<u32> = ResponseCache::default();
        let failed: Result<u32, &str> = cache.wrap("k", || async { Err("boom") }, None, false).await;
        assert_eq!(failed, Err("boom"));
        assert!(!cache.contains("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_track_hits_and_misses() {
        let cache = ResponseCache::new(DEFAULT_TTL, 10);
        cache.set("a", 1, None);
        tokio::time::sleep(Duration::from_secs(2)).await;
        cache.set("b", 2, None);

        cache.get("a");
        cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.max_size, 10);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.oldest_age, Some(Duration::from_secs(2)));
        assert_eq!(stats.newest_age, Some(Duration::ZERO));
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
