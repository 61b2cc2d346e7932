//! In-memory cache of resolved secrets with optional TTL
//!
//! Entries are immutable once written and are replaced wholesale. The cache
//! never performs I/O and its lock is never held across an await point.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::descriptor::{CacheKey, SecretValue};

/// A cached secret value and when it was fetched
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: SecretValue,
    pub fetched_at: Instant,
    pub ttl: Option<Duration>,
}

impl CacheEntry {
    pub fn new(value: SecretValue, ttl: Option<Duration>) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
            ttl,
        }
    }

    /// An entry without a TTL never expires
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(self.fetched_at) >= ttl,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

/// Thread-safe secret cache keyed by (endpoint, secret name, credential)
#[derive(Debug, Default)]
pub struct SecretCache {
    entries: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
}

impl SecretCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw lookup; expiry is left to the caller
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.read().get(key).cloned()
    }

    /// Lookup that treats expired entries as absent
    pub fn get_fresh(&self, key: &CacheKey) -> Option<SecretValue> {
        let entry = self.get(key)?;
        if entry.is_expired() {
            None
        } else {
            Some(entry.value.clone())
        }
    }

    /// Store a value, replacing any existing entry
    pub fn put(&self, key: CacheKey, value: SecretValue, ttl: Option<Duration>) {
        let entry = Arc::new(CacheEntry::new(value, ttl));
        self.write().insert(key, entry);
    }

    /// Remove an entry; absent keys are ignored
    pub fn invalidate(&self, key: &CacheKey) {
        self.write().remove(key);
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Writes are single map operations, so a poisoned map is still consistent
    fn read(&self) -> RwLockReadGuard<'_, HashMap<CacheKey, Arc<CacheEntry>>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CacheKey, Arc<CacheEntry>>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::SecretDescriptor;

    fn key(name: &str) -> CacheKey {
        SecretDescriptor::new("prod", name, None).cache_key()
    }

    #[test]
    fn test_put_and_get() {
        let cache = SecretCache::new();
        assert!(cache.get(&key("db")).is_none());

        cache.put(key("db"), SecretValue::from("s3cret"), None);
        let entry = cache.get(&key("db")).unwrap();
        assert_eq!(entry.value.as_str(), Some("s3cret"));
        assert!(entry.ttl.is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_put_replaces_entry() {
        let cache = SecretCache::new();
        cache.put(key("db"), SecretValue::from("old"), None);
        let old = cache.get(&key("db")).unwrap();

        cache.put(key("db"), SecretValue::from("new"), None);
        let new = cache.get(&key("db")).unwrap();

        // The previously read entry is untouched by the replacement
        assert_eq!(old.value.as_str(), Some("old"));
        assert_eq!(new.value.as_str(), Some("new"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        let cache = SecretCache::new();
        cache.put(key("db"), SecretValue::from("v"), None);
        cache.invalidate(&key("db"));
        cache.invalidate(&key("db"));
        cache.invalidate(&key("never-there"));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = SecretCache::new();
        cache.put(
            key("db"),
            SecretValue::from("v"),
            Some(Duration::from_secs(1)),
        );
        assert!(cache.get_fresh(&key("db")).is_some());

        tokio::time::advance(Duration::from_millis(1100)).await;

        assert!(cache.get_fresh(&key("db")).is_none());
        // Raw lookup still returns the stale entry
        assert!(cache.get(&key("db")).unwrap().is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_without_ttl_never_expires() {
        let cache = SecretCache::new();
        cache.put(key("db"), SecretValue::from("v"), None);
        tokio::time::advance(Duration::from_secs(86_400 * 365)).await;
        assert!(cache.get_fresh(&key("db")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = SecretCache::new();
        cache.put(key("short"), SecretValue::from("a"), Some(Duration::from_secs(1)));
        cache.put(key("long"), SecretValue::from("b"), Some(Duration::from_secs(60)));
        cache.put(key("forever"), SecretValue::from("c"), None);

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("short")).is_none());
    }

    #[test]
    fn test_poisoned_lock_keeps_serving() {
        let cache = Arc::new(SecretCache::new());
        cache.put(key("db"), SecretValue::from("before"), None);

        let poisoner = Arc::clone(&cache);
        let outcome = std::thread::spawn(move || {
            let _guard = poisoner.entries.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(outcome.is_err());
        assert!(cache.entries.is_poisoned());

        assert_eq!(cache.get_fresh(&key("db")).unwrap().as_str(), Some("before"));
        cache.put(key("api"), SecretValue::from("after"), None);
        assert_eq!(cache.get_fresh(&key("api")).unwrap().as_str(), Some("after"));
        assert_eq!(cache.len(), 2);

        cache.invalidate(&key("db"));
        assert!(cache.get(&key("db")).is_none());
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let cache = Arc::new(SecretCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for n in 0..200 {
                        let value = format!("value-{}-{}", i, n);
                        cache.put(key("shared"), SecretValue::from(value), None);
                        let entry = cache.get(&key("shared")).unwrap();
                        assert!(entry.value.as_str().unwrap().starts_with("value-"));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 1);
    }
}
