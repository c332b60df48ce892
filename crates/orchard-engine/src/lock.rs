use crate::cache::KeyValueCache;
use orchard_core::constants::cache_keys;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Ensures a periodic job runs at most once at a time. The lock expires
/// after its TTL so a crashed holder cannot block the job forever.
#[derive(Clone)]
pub struct SingleFlightLock {
    cache: Arc<dyn KeyValueCache>,
}

struct Release<'a> {
    cache: &'a dyn KeyValueCache,
    key: String,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.cache.delete(&self.key);
    }
}

impl SingleFlightLock {
    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self { cache }
    }

    fn key(name: &str) -> String {
        format!("{}/{}", cache_keys::LOCKS, name)
    }

    /// Runs `job` if nobody holds `name`. Returns `None` when the run was skipped.
    pub async fn run<F, Fut, T>(&self, name: &str, ttl: Duration, job: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let key = Self::key(name);
        if !self.cache.add_if_absent(&key, "held", Some(ttl)) {
            tracing::warn!("'{}' is already running, skipping this round", name);
            return None;
        }
        let _release = Release {
            cache: self.cache.as_ref(),
            key,
        };
        Some(job().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[tokio::test]
    async fn test_second_holder_is_skipped() {
        let cache: Arc<dyn KeyValueCache> = Arc::new(MemoryCache::new());
        let lock = SingleFlightLock::new(cache.clone());
        let inner = lock.clone();

        let outer = lock
            .run("sweep", Duration::from_secs(60), || async move {
                inner
                    .run("sweep", Duration::from_secs(60), || async { 2 })
                    .await
            })
            .await;
        assert_eq!(outer, Some(None));
        assert!(cache.get("lock/sweep").is_none());
        assert_eq!(
            lock.run("sweep", Duration::from_secs(60), || async { 3 }).await,
            Some(3)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_lock_expires() {
        let cache: Arc<dyn KeyValueCache> = Arc::new(MemoryCache::new());
        cache.add_if_absent("lock/health", "held", Some(Duration::from_secs(30)));
        let lock = SingleFlightLock::new(cache);
        assert!(lock
            .run("health", Duration::from_secs(30), || async {})
            .await
            .is_none());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(lock
            .run("health", Duration::from_secs(30), || async {})
            .await
            .is_some());
    }
}
