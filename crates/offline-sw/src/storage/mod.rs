//! Persistent backends for cache generations.
//!
//! A backend knows nothing about HTTP: it maps `(cache name, key)` to a
//! [`CacheEntry`] and lists what it holds.

use async_trait::async_trait;

use crate::cache::CacheEntry;
use crate::Result;

mod disk;
mod memory;

pub use disk::DiskBackend;
pub use memory::MemoryBackend;

/// Storage for named caches of entries.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Make sure a cache exists.
    async fn create(&self, cache: &str) -> Result<()>;

    /// Look up an entry.
    async fn get(&self, cache: &str, key: &str) -> Result<Option<CacheEntry>>;

    /// Store or overwrite an entry, creating the cache if needed.
    /// A single put replaces the whole entry.
    async fn put(&self, cache: &str, key: &str, entry: CacheEntry) -> Result<()>;

    /// Remove an entry.
    async fn delete(&self, cache: &str, key: &str) -> Result<bool>;

    /// Keys held by a cache. Missing caches have no keys.
    async fn keys(&self, cache: &str) -> Result<Vec<String>>;

    /// Names of every cache, sorted.
    async fn cache_names(&self) -> Result<Vec<String>>;

    /// Drop a whole cache.
    async fn delete_cache(&self, cache: &str) -> Result<bool>;
}
