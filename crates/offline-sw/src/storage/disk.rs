//! File-per-entry backend.
//!
//! ```text
//! <root>/
//!     <hex(cache name)>/
//!         <sha256(key)>.json   { "key": ..., "entry": { ... } }
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use super::CacheBackend;
use crate::cache::CacheEntry;
use crate::{Result, ServiceWorkerError};

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    entry: CacheEntry,
}

/// Backend that keeps every generation in a directory on disk.
#[derive(Debug)]
pub struct DiskBackend {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl DiskBackend {
    /// Open (or create) a backend rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "Disk cache backend opened");
        Ok(Self {
            root,
            tmp_counter: AtomicU64::new(0),
        })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cache_dir(&self, cache: &str) -> PathBuf {
        self.root.join(hex::encode(cache.as_bytes()))
    }

    fn entry_path(&self, cache: &str, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.cache_dir(cache)
            .join(format!("{}.json", hex::encode(digest)))
    }

    async fn read_entry(path: &Path) -> Result<Option<StoredEntry>> {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| ServiceWorkerError::storage(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CacheBackend for DiskBackend {
    async fn create(&self, cache: &str) -> Result<()> {
        fs::create_dir_all(self.cache_dir(cache)).await?;
        Ok(())
    }

    async fn get(&self, cache: &str, key: &str) -> Result<Option<CacheEntry>> {
        Ok(Self::read_entry(&self.entry_path(cache, key))
            .await?
            .map(|stored| stored.entry))
    }

    async fn put(&self, cache: &str, key: &str, entry: CacheEntry) -> Result<()> {
        self.create(cache).await?;

        let path = self.entry_path(cache, key);
        let stored = StoredEntry {
            key: key.to_string(),
            entry,
        };
        let bytes = serde_json::to_vec(&stored)
            .map_err(|e| ServiceWorkerError::storage(e.to_string()))?;

        // Rename is atomic, so readers see either the old or the new entry.
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp{n}"));
        fs::write(&tmp, &bytes).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, cache: &str, key: &str) -> Result<bool> {
        match fs::remove_file(self.entry_path(cache, key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self, cache: &str) -> Result<Vec<String>> {
        let mut dir = match fs::read_dir(self.cache_dir(cache)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_entry(&path).await {
                Ok(Some(stored)) => keys.push(stored.key),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache entry"),
            }
        }
        Ok(keys)
    }

    async fn cache_names(&self) -> Result<Vec<String>> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            let decoded = item
                .file_name()
                .to_str()
                .and_then(|s| hex::decode(s).ok())
                .and_then(|b| String::from_utf8(b).ok());
            match decoded {
                Some(name) => names.push(name),
                None => debug!(dir = ?item.file_name(), "Ignoring foreign directory"),
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_cache(&self, cache: &str) -> Result<bool> {
        match fs::remove_dir_all(self.cache_dir(cache)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
