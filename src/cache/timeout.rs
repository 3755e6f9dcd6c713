//! Key to value store with per-entry expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::Clock;

/// Default lifetime of cached entries (10 minutes).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    birth: u128,
}

/// Non-persistent cache where every entry expires `timeout` after it was
/// set.
///
/// Keys are case-insensitive. Expired entries are purged lazily, when they
/// are accessed.
pub struct TimeoutCache<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    timeout_millis: Mutex<u128>,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> TimeoutCache<V> {
    /// Create a new [`TimeoutCache`].
    pub fn new(clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            timeout_millis: Mutex::new(timeout.as_millis()),
            clock,
        }
    }

    fn normalize(key: &str) -> String {
        key.to_lowercase()
    }

    fn is_alive(&self, birth: u128, now: u128) -> bool {
        now < birth.saturating_add(*self.timeout_millis.lock())
    }

    /// Insert or overwrite `key`. The entry is born now.
    pub fn set(&self, key: &str, value: V) {
        let birth = self.clock.now_millis();
        self.entries
            .lock()
            .insert(Self::normalize(key), Entry { value, birth });
    }

    /// Return the value stored under `key` if it did not expire.
    pub fn get(&self, key: &str) -> Option<V> {
        let key = Self::normalize(key);
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();

        let birth = entries.get(&key)?.birth;
        if self.is_alive(birth, now) {
            entries.get(&key).map(|entry| entry.value.clone())
        } else {
            entries.remove(&key);
            None
        }
    }

    /// Remove one entry, or every entry when `key` is `None`.
    pub fn invalidate(&self, key: Option<&str>) {
        let mut entries = self.entries.lock();
        match key {
            Some(key) => {
                entries.remove(&Self::normalize(key));
            },
            None => entries.clear(),
        }
    }

    /// Change the timeout applied to every following expiry check.
    ///
    /// Birth times are kept: entries are not renewed.
    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout_millis.lock() = timeout.as_millis();
    }

    /// Current timeout.
    pub fn timeout(&self) -> Duration {
        let millis = *self.timeout_millis.lock();
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Every value that would still be returned by [`TimeoutCache::get`].
    pub fn all_valid(&self) -> Vec<V> {
        let now = self.clock.now_millis();
        self.entries
            .lock()
            .values()
            .filter(|entry| self.is_alive(entry.birth, now))
            .map(|entry| entry.value.clone())
            .collect()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache(timeout: u64) -> (Arc<ManualClock>, TimeoutCache<String>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let cache =
            TimeoutCache::new(clock.clone(), Duration::from_secs(timeout));
        (clock, cache)
    }

    #[test]
    fn test_set_then_get_ignores_case() {
        let (_, cache) = cache(10);
        cache.set("TestId", "value".into());

        assert_eq!(cache.get("testid").as_deref(), Some("value"));
        assert_eq!(cache.get("TESTID").as_deref(), Some("value"));
        assert_eq!(cache.get("other"), None);
    }

    #[test]
    fn test_expiry_evicts() {
        let (clock, cache) = cache(10);
        cache.set("key", "value".into());

        clock.advance(Duration::from_millis(9_999));
        assert!(cache.get("key").is_some());
        assert_eq!(cache.all_valid().len(), 1);

        clock.advance(Duration::from_millis(1));
        assert!(cache.all_valid().is_empty());
        assert_eq!(cache.get("key"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_timeout_keeps_birth_time() {
        let (clock, cache) = cache(100);
        cache.set("key", "value".into());
        clock.advance(Duration::from_secs(30));

        cache.set_timeout(Duration::from_secs(20));
        assert_eq!(cache.get("key"), None);

        cache.set("key", "fresh".into());
        cache.set_timeout(Duration::from_secs(60));
        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get("key").as_deref(), Some("fresh"));
    }

    #[test]
    fn test_invalidate() {
        let (_, cache) = cache(10);
        cache.set("TestId", "a".into());
        cache.set("NewId", "b".into());

        cache.invalidate(Some("TESTID"));
        assert_eq!(cache.get("testid"), None);
        assert_eq!(cache.all_valid(), vec!["b".to_string()]);

        cache.invalidate(None);
        assert!(cache.all_valid().is_empty());
    }

    #[test]
    fn test_overwrite_renews() {
        let (clock, cache) = cache(10);
        cache.set("key", "old".into());
        clock.advance(Duration::from_secs(8));
        cache.set("KEY", "new".into());
        clock.advance(Duration::from_secs(8));

        assert_eq!(cache.get("key").as_deref(), Some("new"));
        assert_eq!(cache.len(), 1);
    }
}
