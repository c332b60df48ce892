use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Small shared key-value store for cross-stage data, health history and locks.
pub trait KeyValueCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>);

    /// Sets `key` only when it is absent or expired. Returns whether it was set.
    fn add_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool;

    fn delete(&self, key: &str) -> bool;

    /// Prepends to the list at `key`; the newest entry comes first.
    fn push(&self, key: &str, value: &str);

    /// Keeps the first `len` entries of the list at `key`.
    fn trim(&self, key: &str, len: usize);

    fn list(&self, key: &str) -> Vec<String>;
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires.map_or(true, |at| now < at)
    }
}

/// In-process cache. Expired entries are dropped lazily on access.
#[derive(Debug, Default)]
pub struct MemoryCache {
    values: Mutex<HashMap<String, Entry>>,
    lists: Mutex<HashMap<String, VecDeque<String>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match values.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                values.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires: ttl.map(|t| Instant::now() + t),
            },
        );
    }

    fn add_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if values.get(key).is_some_and(|e| e.is_live(now)) {
            return false;
        }
        values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires: ttl.map(|t| now + t),
            },
        );
        true
    }

    fn delete(&self, key: &str) -> bool {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        let removed = values.remove(key).is_some();
        let mut lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
        lists.remove(key).is_some() || removed
    }

    fn push(&self, key: &str, value: &str) {
        let mut lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
        lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
    }

    fn trim(&self, key: &str, len: usize) {
        let mut lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = lists.get_mut(key) {
            list.truncate(len);
        }
    }

    fn list(&self, key: &str) -> Vec<String> {
        let lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
        lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Some(Duration::from_secs(10)));
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get("k").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_if_absent_respects_expiry() {
        let cache = MemoryCache::new();
        assert!(cache.add_if_absent("lock/x", "1", Some(Duration::from_secs(5))));
        assert!(!cache.add_if_absent("lock/x", "2", Some(Duration::from_secs(5))));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.add_if_absent("lock/x", "3", None));
        assert_eq!(cache.get("lock/x").as_deref(), Some("3"));
    }

    #[test]
    fn test_lists_keep_newest_first() {
        let cache = MemoryCache::new();
        for i in 0..5 {
            cache.push("h", &i.to_string());
        }
        cache.trim("h", 3);
        assert_eq!(cache.list("h"), vec!["4", "3", "2"]);
        assert!(cache.delete("h"));
        assert!(cache.list("h").is_empty());
    }
}
