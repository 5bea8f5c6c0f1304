//! Small bounded TTL cache for remote-call outcomes.

use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

pub struct TtlCache<K, V> {
    entries: DashMap<K, (V, Instant)>,
    default_ttl: Duration,
    capacity: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(default_ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            capacity: capacity.max(1),
        }
    }

    /// Returns the live value for `key`, dropping it if it has expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            let (value, expires_at) = entry.value();
            if *expires_at > now {
                return Some(value.clone());
            }
        }
        self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
        None
    }

    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.make_room();
        }
        self.entries.insert(key, (value, Instant::now() + ttl));
    }

    pub fn remove(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn make_room(&self) {
        if self.purge_expired() > 0 {
            return;
        }
        // Full of live entries: drop the one closest to expiry.
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().1)
            .map(|entry| entry.key().clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_returns_live_entries() {
        let cache = TtlCache::new(Duration::from_secs(60), 10);
        cache.set("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), None);
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = TtlCache::new(Duration::from_secs(60), 10);
        cache.set_with_ttl("a".to_string(), 1, Duration::ZERO);
        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_soonest_expiry() {
        let cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.set_with_ttl("short".to_string(), 1, Duration::from_secs(5));
        cache.set_with_ttl("long".to_string(), 2, Duration::from_secs(500));
        cache.set("new".to_string(), 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"short".to_string()), None);
        assert_eq!(cache.get(&"long".to_string()), Some(2));
        assert_eq!(cache.get(&"new".to_string()), Some(3));
    }

    #[test]
    fn test_purge_expired_counts_removed() {
        let cache = TtlCache::new(Duration::from_secs(60), 10);
        cache.set_with_ttl(1, "gone", Duration::ZERO);
        cache.set(2, "kept");
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
