use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;

use super::CacheBackend;
use crate::cache::CacheEntry;
use crate::{Result, ServiceWorkerError};

/// A cache instance.
#[derive(Debug, Default)]
struct Cache {
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    fn size(&self) -> usize {
        self.entries.values().map(CacheEntry::size).sum()
    }
}

/// In-process backend.
///
/// Optionally enforces a byte quota across all caches, so storage
/// exhaustion can be exercised without a real disk.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    caches: RwLock<HashMap<String, Cache>>,
    quota_bytes: Option<usize>,
}

impl MemoryBackend {
    /// Create an unbounded backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend that rejects writes beyond `bytes` of body data.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            quota_bytes: Some(bytes),
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn create(&self, cache: &str) -> Result<()> {
        self.caches
            .write()
            .await
            .entry(cache.to_string())
            .or_default();
        Ok(())
    }

    async fn get(&self, cache: &str, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self
            .caches
            .read()
            .await
            .get(cache)
            .and_then(|c| c.entries.get(key))
            .cloned())
    }

    async fn put(&self, cache: &str, key: &str, entry: CacheEntry) -> Result<()> {
        let mut caches = self.caches.write().await;

        if let Some(quota) = self.quota_bytes {
            let used: usize = caches.values().map(Cache::size).sum();
            let replaced = caches
                .get(cache)
                .and_then(|c| c.entries.get(key))
                .map_or(0, CacheEntry::size);
            if used - replaced + entry.size() > quota {
                return Err(ServiceWorkerError::storage(format!(
                    "quota of {quota} bytes exceeded writing {key}"
                )));
            }
        }

        caches
            .entry(cache.to_string())
            .or_default()
            .entries
            .insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, cache: &str, key: &str) -> Result<bool> {
        Ok(self
            .caches
            .write()
            .await
            .get_mut(cache)
            .map_or(false, |c| c.entries.remove(key).is_some()))
    }

    async fn keys(&self, cache: &str) -> Result<Vec<String>> {
        Ok(self
            .caches
            .read()
            .await
            .get(cache)
            .map(|c| c.entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn cache_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_cache(&self, cache: &str) -> Result<bool> {
        Ok(self.caches.write().await.remove(cache).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, size: usize) -> CacheEntry {
        CacheEntry::json(key, vec![b'x'; size])
    }

    #[tokio::test]
    async fn test_put_creates_cache() {
        let backend = MemoryBackend::new();
        backend.put("v1", "a", entry("a", 1)).await.unwrap();

        assert_eq!(backend.cache_names().await.unwrap(), vec!["v1".to_string()]);
        assert!(backend.get("v1", "a").await.unwrap().is_some());
        assert!(backend.get("v2", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_entry() {
        let backend = MemoryBackend::new();
        backend.put("v1", "a", entry("a", 1)).await.unwrap();

        assert!(backend.delete("v1", "a").await.unwrap());
        assert!(!backend.delete("v1", "a").await.unwrap());
        assert!(backend.keys("v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quota_rejects_oversized_write() {
        let backend = MemoryBackend::with_quota(10);
        backend.put("v1", "a", entry("a", 6)).await.unwrap();

        let err = backend.put("v1", "b", entry("b", 6)).await.unwrap_err();
        assert!(matches!(err, ServiceWorkerError::Storage(_)));

        // Overwriting the same key only counts the difference.
        backend.put("v1", "a", entry("a", 10)).await.unwrap();
    }
}
