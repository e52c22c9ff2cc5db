/// Time-boxed memoization of decoded payloads
///
/// Keyed by logical name (table, index) with an absolute expiry per
/// entry. Entries are immutable value snapshots; overwriting on every
/// successful persist is what gives readers their own writes back
/// without re-fetching. Beyond TTL, a byte budget is enforced by
/// evicting oldest-by-expiry entries, an approximate LRU that is good
/// enough for a handful of hot tables.
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
    weight: usize,
    tags: Vec<String>,
}

#[derive(Debug)]
struct Inner<T> {
    entries: HashMap<String, CacheEntry<T>>,
    total_weight: usize,
}

#[derive(Debug)]
pub struct DocumentCache<T: Clone> {
    inner: RwLock<Inner<T>>,
    config: CacheConfig,
}

impl<T: Clone> DocumentCache<T> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                total_weight: 0,
            }),
            config,
        }
    }

    /// Present and unexpired returns the value; expired entries are
    /// purged and read as absent.
    pub fn get(&self, key: &str) -> Option<T> {
        {
            let inner = self.inner.read();
            match inner.entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone())
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: purge under the write lock.
        let mut inner = self.inner.write();
        let expired_weight = inner
            .entries
            .get(key)
            .filter(|entry| entry.expires_at <= Instant::now())
            .map(|entry| entry.weight);
        if let Some(weight) = expired_weight {
            inner.entries.remove(key);
            inner.total_weight -= weight;
        }
        None
    }

    pub fn set(&self, key: &str, value: T, weight: usize) {
        self.set_full(key, value, weight, self.config.ttl, Vec::new());
    }

    pub fn set_with_ttl(&self, key: &str, value: T, weight: usize, ttl: Duration) {
        self.set_full(key, value, weight, ttl, Vec::new());
    }

    pub fn set_tagged(&self, key: &str, value: T, weight: usize, tags: Vec<String>) {
        self.set_full(key, value, weight, self.config.ttl, tags);
    }

    fn set_full(&self, key: &str, value: T, weight: usize, ttl: Duration, tags: Vec<String>) {
        let mut inner = self.inner.write();

        if let Some(old) = inner.entries.remove(key) {
            inner.total_weight -= old.weight;
        }
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
                weight,
                tags,
            },
        );
        inner.total_weight += weight;

        // Oldest-by-expiry out first until the budget holds.
        while inner.total_weight > self.config.max_bytes && !inner.entries.is_empty() {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(key, _)| key.clone());
            if let Some(evict) = oldest {
                if let Some(entry) = inner.entries.remove(&evict) {
                    inner.total_weight -= entry.weight;
                    debug!(key = %evict, weight = entry.weight, "evicted cache entry over budget");
                }
            }
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.entries.remove(key) {
            Some(entry) => {
                inner.total_weight -= entry.weight;
                true
            }
            None => false,
        }
    }

    /// Drop every entry carrying the tag. Returns how many went.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        let mut inner = self.inner.write();
        let doomed: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.tags.iter().any(|t| t == tag))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            if let Some(entry) = inner.entries.remove(key) {
                inner.total_weight -= entry.weight;
            }
        }
        doomed.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.total_weight = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn total_weight(&self) -> usize {
        self.inner.read().total_weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn cache_with(max_bytes: usize, ttl: Duration) -> DocumentCache<String> {
        DocumentCache::new(CacheConfig { ttl, max_bytes })
    }

    #[test]
    fn test_get_set_roundtrip() {
        let cache = cache_with(1024, Duration::from_secs(60));
        assert!(cache.get("t").is_none());

        cache.set("t", "value".to_string(), 5);
        assert_eq!(cache.get("t").unwrap(), "value");
        assert_eq!(cache.total_weight(), 5);
    }

    #[test]
    fn test_expired_entry_is_absent_and_purged() {
        let cache = cache_with(1024, Duration::from_millis(10));
        cache.set("t", "value".to_string(), 5);

        thread::sleep(Duration::from_millis(25));
        assert!(cache.get("t").is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.total_weight(), 0);
    }

    #[test]
    fn test_overwrite_adjusts_weight() {
        let cache = cache_with(1024, Duration::from_secs(60));
        cache.set("t", "old".to_string(), 100);
        cache.set("t", "new".to_string(), 40);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_weight(), 40);
        assert_eq!(cache.get("t").unwrap(), "new");
    }

    #[test]
    fn test_budget_evicts_oldest_by_expiry() {
        let cache = cache_with(100, Duration::from_secs(60));
        cache.set_with_ttl("a", "a".to_string(), 40, Duration::from_secs(10));
        cache.set_with_ttl("b", "b".to_string(), 40, Duration::from_secs(20));
        // Pushes total to 120; "a" expires first and goes.
        cache.set_with_ttl("c", "c".to_string(), 40, Duration::from_secs(30));

        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.total_weight(), 80);
    }

    #[test]
    fn test_invalidate_tag() {
        let cache = cache_with(1024, Duration::from_secs(60));
        cache.set_tagged("t1", "v1".to_string(), 1, vec!["tables".to_string()]);
        cache.set_tagged("t2", "v2".to_string(), 1, vec!["tables".to_string()]);
        cache.set_tagged("i1", "v3".to_string(), 1, vec!["indexes".to_string()]);

        assert_eq!(cache.invalidate_tag("tables"), 2);
        assert!(cache.get("t1").is_none());
        assert!(cache.get("t2").is_none());
        assert!(cache.get("i1").is_some());
    }

    #[test]
    fn test_clear() {
        let cache = cache_with(1024, Duration::from_secs(60));
        cache.set("a", "a".to_string(), 10);
        cache.set("b", "b".to_string(), 10);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.total_weight(), 0);
    }
}
