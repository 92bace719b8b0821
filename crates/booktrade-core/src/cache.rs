//! Expiring in-memory cache
//!
//! A string-keyed store with a per-entry time-to-live, used to memoize entity
//! lookups. Keys are namespaced by prefix segments (`users:id:...`,
//! `users:list:...`) so a whole family can be dropped with
//! [`ExpiringCache::delete_pattern`] after a write.
//!
//! Expiry is enforced on the read path: an entry past its deadline is
//! reported as a miss and evicted by the read that found it. The optional
//! background sweeper only bounds memory held by entries nobody reads again.
//!
//! A cache built with [`ExpiringCache::disabled`] (also its `Default`) holds
//! nothing: every read misses and every write is a no-op, so call sites never
//! need to check whether caching is configured.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Longest lifetime an entry can be given; longer TTLs are clamped to it
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn deadline(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now)
}

// ============================================================================
// Cache Statistics
// ============================================================================

/// Cache statistics
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_evictions(&self, count: u64) {
        if count > 0 {
            self.evictions.fetch_add(count, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    /// Entries removed because they expired (lazily or by the sweeper)
    pub evictions: u64,
}

impl CacheStatsSnapshot {
    /// Hit rate in `[0.0, 1.0]`, 0 when nothing was read yet
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ============================================================================
// Expiring Cache
// ============================================================================

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

struct Shared<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
    default_ttl: Duration,
    stats: CacheStats,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<V> Shared<V> {
    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        self.stats.record_evictions(removed as u64);
        removed
    }
}

impl<V> Drop for Shared<V> {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

/// Concurrency-safe key/value cache with per-entry expiry
///
/// Cloning is cheap and yields a handle to the same entries.
pub struct ExpiringCache<V> {
    shared: Option<Arc<Shared<V>>>,
}

impl<V> Clone for ExpiringCache<V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<V> Default for ExpiringCache<V> {
    fn default() -> Self {
        Self::disabled()
    }
}

impl<V> std::fmt::Debug for ExpiringCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringCache")
            .field("enabled", &self.is_enabled())
            .field("len", &self.len())
            .finish()
    }
}

impl<V> ExpiringCache<V> {
    /// Create an empty cache whose [`set_default`](Self::set_default) uses `default_ttl`
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            shared: Some(Arc::new(Shared {
                entries: RwLock::new(HashMap::new()),
                default_ttl,
                stats: CacheStats::default(),
                sweeper: Mutex::new(None),
            })),
        }
    }

    /// A cache that stores nothing
    pub fn disabled() -> Self {
        Self { shared: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.is_some()
    }

    /// Store `value` under `key`, expiring `ttl` from now
    ///
    /// Overwrites any previous value and resets its expiry. A `ttl` beyond
    /// [`MAX_TTL`] is clamped.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let Some(shared) = &self.shared else {
            return;
        };
        let entry = Entry {
            value,
            expires_at: deadline(Instant::now(), ttl),
        };
        shared.entries.write().insert(key.into(), entry);
        shared.stats.record_write();
    }

    /// Store `value` with the cache's default TTL
    pub fn set_default(&self, key: impl Into<String>, value: V) {
        if let Some(ttl) = self.default_ttl() {
            self.set(key, value, ttl);
        }
    }

    /// Remove a single entry; no-op if absent
    pub fn delete(&self, key: &str) {
        if let Some(shared) = &self.shared {
            shared.entries.write().remove(key);
        }
    }

    /// Remove every entry whose key contains `pattern`
    ///
    /// Returns the number of entries removed.
    pub fn delete_pattern(&self, pattern: &str) -> usize {
        let Some(shared) = &self.shared else {
            return 0;
        };
        let mut entries = shared.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !key.contains(pattern));
        before - entries.len()
    }

    /// Remove all entries
    pub fn flush(&self) {
        if let Some(shared) = &self.shared {
            shared.entries.write().clear();
        }
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.shared
            .as_ref()
            .map(|shared| shared.entries.read().len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.shared.as_ref().map(|shared| shared.default_ttl)
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.shared
            .as_ref()
            .map(|shared| shared.stats.snapshot())
            .unwrap_or_default()
    }

    /// Evict every expired entry now
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        self.shared
            .as_ref()
            .map(|shared| shared.purge_expired())
            .unwrap_or(0)
    }
}

impl<V: Clone> ExpiringCache<V> {
    /// Look up `key`
    ///
    /// Returns `None` when the key is absent or expired. An expired entry is
    /// evicted as a side effect.
    pub fn get(&self, key: &str) -> Option<V> {
        let shared = self.shared.as_ref()?;
        let now = Instant::now();

        {
            let entries = shared.entries.read();
            match entries.get(key) {
                None => {
                    shared.stats.record_miss();
                    return None;
                }
                Some(entry) if !entry.is_expired(now) => {
                    shared.stats.record_hit();
                    return Some(entry.value.clone());
                }
                Some(_) => {}
            }
        }

        // Expired: re-check under the write lock, a concurrent `set` may have
        // refreshed the entry in between.
        let mut entries = shared.entries.write();
        if entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(Instant::now()))
        {
            entries.remove(key);
            shared.stats.record_evictions(1);
        }
        shared.stats.record_miss();
        None
    }
}

impl<V: Send + Sync + 'static> ExpiringCache<V> {
    /// Start the background sweep on the current tokio runtime
    ///
    /// Replaces a previously started sweeper. Returns `false` when the cache
    /// is disabled or no runtime is available. The task holds only a weak
    /// reference and ends once every handle to the cache is dropped.
    pub fn start_sweeper(&self, every: Duration) -> bool {
        let Some(shared) = &self.shared else {
            return false;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No tokio runtime available, cache sweeper not started");
            return false;
        };

        let every = every.max(Duration::from_millis(1));
        let weak: Weak<Shared<V>> = Arc::downgrade(shared);
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let removed = shared.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed, "Cache sweep evicted expired entries");
                }
            }
        });

        if let Some(previous) = shared.sweeper.lock().replace(handle) {
            previous.abort();
        }
        true
    }

    /// Stop the background sweep, if running
    pub fn stop_sweeper(&self) {
        if let Some(shared) = &self.shared {
            if let Some(handle) = shared.sweeper.lock().take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn cache() -> ExpiringCache<String> {
        ExpiringCache::new(Duration::from_secs(60))
    }

    #[test]
    fn test_set_and_get() {
        let cache = cache();
        cache.set("books:1", "Anna Karenina".to_string(), Duration::from_secs(60));

        assert_eq!(cache.get("books:1"), Some("Anna Karenina".to_string()));
        assert_eq!(cache.get("books:2"), None);
    }

    #[test]
    fn test_overwrite_resets_value_and_expiry() {
        let cache = cache();
        cache.set("k", "old".to_string(), Duration::from_millis(10));
        cache.set("k", "new".to_string(), Duration::from_secs(60));

        thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k"), Some("new".to_string()));
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = cache();
        cache.set("k", "v".to_string(), Duration::from_millis(10));
        assert_eq!(cache.get("k"), Some("v".to_string()));

        thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_expired_read_evicts() {
        let cache = cache();
        cache.set("k", "v".to_string(), Duration::from_millis(5));
        cache.set("other", "v".to_string(), Duration::from_secs(60));
        thread::sleep(Duration::from_millis(15));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_zero_ttl_is_immediately_expired() {
        let cache = cache();
        cache.set("k", "v".to_string(), Duration::ZERO);
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_huge_ttl_is_clamped() {
        let cache = cache();
        cache.set("forever", "v".to_string(), Duration::MAX);
        cache.set("secs", "v".to_string(), Duration::from_secs(u64::MAX));
        assert_eq!(cache.get("forever"), Some("v".to_string()));
        assert_eq!(cache.get("secs"), Some("v".to_string()));

        let cache: ExpiringCache<u32> = ExpiringCache::new(Duration::from_secs(u64::MAX));
        cache.set_default("n", 7);
        assert_eq!(cache.get("n"), Some(7));
    }

    #[test]
    fn test_set_default_uses_configured_ttl() {
        let cache: ExpiringCache<u32> = ExpiringCache::new(Duration::from_millis(10));
        cache.set_default("n", 7);
        assert_eq!(cache.get("n"), Some(7));

        thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("n"), None);
    }

    #[test]
    fn test_delete() {
        let cache = cache();
        cache.set("k", "v".to_string(), Duration::from_secs(60));
        cache.delete("k");
        cache.delete("missing");
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_delete_pattern() {
        let cache = cache();
        let ttl = Duration::from_secs(60);
        cache.set("tags:list:1:10", "a".to_string(), ttl);
        cache.set("tags:list:2:10", "b".to_string(), ttl);
        cache.set("tags:id:5", "c".to_string(), ttl);
        cache.set("books:id:5", "d".to_string(), ttl);

        assert_eq!(cache.delete_pattern("tags:list:"), 2);
        assert_eq!(cache.get("tags:list:1:10"), None);
        assert_eq!(cache.get("tags:list:2:10"), None);
        assert_eq!(cache.get("tags:id:5"), Some("c".to_string()));

        // Substring, not prefix
        assert_eq!(cache.delete_pattern(":id:5"), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_flush() {
        let cache = cache();
        cache.set("a", "1".to_string(), Duration::from_secs(60));
        cache.set("b", "2".to_string(), Duration::from_secs(60));
        cache.flush();
        assert!(cache.is_empty());
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn test_purge_expired() {
        let cache = cache();
        cache.set("short", "1".to_string(), Duration::from_millis(5));
        cache.set("long", "2".to_string(), Duration::from_secs(60));
        thread::sleep(Duration::from_millis(15));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_disabled_cache_is_inert() {
        let cache: ExpiringCache<String> = ExpiringCache::default();

        cache.set("k", "v".to_string(), Duration::from_secs(60));
        cache.set_default("k", "v".to_string());
        assert_eq!(cache.get("k"), None);
        cache.delete("k");
        assert_eq!(cache.delete_pattern("k"), 0);
        cache.flush();
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
        assert_eq!(cache.purge_expired(), 0);
        assert_eq!(cache.default_ttl(), None);
        assert_eq!(cache.stats(), CacheStatsSnapshot::default());
        assert!(!cache.start_sweeper(Duration::from_millis(1)));
        cache.stop_sweeper();
        assert!(!cache.is_enabled());
    }

    #[test]
    fn test_clones_share_entries() {
        let cache = cache();
        let other = cache.clone();
        cache.set("k", "v".to_string(), Duration::from_secs(60));
        assert_eq!(other.get("k"), Some("v".to_string()));
    }

    #[test]
    fn test_stats() {
        let cache = cache();
        cache.set("k", "v".to_string(), Duration::from_secs(60));
        cache.get("k");
        cache.get("k");
        cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_access() {
        let cache: ExpiringCache<usize> = ExpiringCache::new(Duration::from_secs(60));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("t{t}:k{}", i % 50);
                        cache.set(key.clone(), i, Duration::from_secs(60));
                        assert!(cache.get(&key).is_some());
                        if i % 100 == 0 {
                            cache.delete_pattern(&format!("t{t}:"));
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 8 * 50);
    }

    #[tokio::test]
    async fn test_sweeper_evicts_unread_entries() {
        let cache = cache();
        cache.set("k", "v".to_string(), Duration::from_millis(5));
        assert!(cache.start_sweeper(Duration::from_millis(10)));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.len(), 0);
        cache.stop_sweeper();
    }

    #[tokio::test]
    async fn test_reads_correct_without_sweeper_progress() {
        let cache = cache();
        assert!(cache.start_sweeper(Duration::from_secs(24 * 60 * 60)));
        cache.set("k", "v".to_string(), Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_sweeper_requires_runtime() {
        let cache = cache();
        assert!(!cache.start_sweeper(Duration::from_millis(10)));
    }
}
