//! Cache generations and response snapshots.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use offline_net::{Request, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::storage::CacheBackend;
use crate::{Result, ServiceWorkerError};

// ==================== Entries ====================

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status code. The reason phrase is implied by it.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a network response for the request that produced it.
    pub fn from_response(request: &Request, response: &Response) -> Self {
        let mut headers = HashMap::new();
        for name in response.headers.keys() {
            let joined = response
                .headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(", ");
            headers.insert(name.as_str().to_string(), joined);
        }

        Self {
            url: cache_key(&request.url),
            method: request.method.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            cached_at: now_millis(),
        }
    }

    /// An entry holding a JSON document under a reserved key.
    pub fn json(key: &str, body: Vec<u8>) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self {
            url: key.to_string(),
            method: "GET".to_string(),
            status: 200,
            headers,
            body,
            cached_at: now_millis(),
        }
    }

    /// Rebuild a response from the snapshot.
    pub fn to_response(&self) -> Result<Response> {
        let url = Url::parse(&self.url)
            .map_err(|e| ServiceWorkerError::storage(format!("bad cached url {}: {e}", self.url)))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| ServiceWorkerError::storage(e.to_string()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(n, v);
            }
        }

        Ok(Response::new(url, status, headers, self.body.clone()))
    }

    /// Body size in bytes.
    pub fn size(&self) -> usize {
        self.body.len()
    }
}

mod body_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Key a request URL is stored under. Fragments never reach the server.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

pub(crate) fn without_search(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.set_query(None);
    url.to_string()
}

/// Options for [`CacheStore::match_request`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    /// Ignore the query string when comparing URLs.
    pub ignore_search: bool,
}

impl MatchOptions {
    /// Match regardless of query string.
    pub fn ignore_search() -> Self {
        Self { ignore_search: true }
    }
}

// ==================== Cache ====================

/// One cache generation.
#[derive(Clone)]
pub struct CacheStore {
    /// Cache name.
    name: String,

    backend: Arc<dyn CacheBackend>,
}

impl CacheStore {
    fn new(name: &str, backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            name: name.to_string(),
            backend,
        }
    }

    /// Generation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store or overwrite the snapshot for a URL.
    pub async fn put(&self, url: &Url, entry: CacheEntry) -> Result<()> {
        self.put_raw(&cache_key(url), entry).await
    }

    /// Snapshot a response and store it under its request URL.
    pub async fn put_response(&self, request: &Request, response: &Response) -> Result<()> {
        self.put(&request.url, CacheEntry::from_response(request, response))
            .await
    }

    /// Store under a literal key.
    pub async fn put_raw(&self, key: &str, entry: CacheEntry) -> Result<()> {
        debug!(cache = %self.name, key, bytes = entry.size(), "Cache put");
        self.backend.put(&self.name, key, entry).await
    }

    /// Look up a literal key.
    pub async fn get_raw(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.backend.get(&self.name, key).await
    }

    /// Match a request URL.
    pub async fn match_request(&self, url: &Url, options: MatchOptions) -> Result<Option<CacheEntry>> {
        if let Some(entry) = self.get_raw(&cache_key(url)).await? {
            return Ok(Some(entry));
        }
        if !options.ignore_search {
            return Ok(None);
        }

        let wanted = without_search(url);
        for key in self.backend.keys(&self.name).await? {
            let Ok(candidate) = Url::parse(&key) else {
                continue;
            };
            if without_search(&candidate) == wanted {
                return self.get_raw(&key).await;
            }
        }
        Ok(None)
    }

    /// Delete one entry.
    pub async fn delete(&self, url: &Url) -> Result<bool> {
        self.backend.delete(&self.name, &cache_key(url)).await
    }

    /// All keys in this generation.
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.backend.keys(&self.name).await
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore").field("name", &self.name).finish()
    }
}

// ==================== Cache Storage ====================

/// Every cache generation the origin has (the `caches` global).
#[derive(Clone)]
pub struct CacheStorage {
    backend: Arc<dyn CacheBackend>,
}

impl CacheStorage {
    /// Create cache storage over a backend.
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Open a cache (creates if doesn't exist).
    pub async fn open(&self, name: &str) -> Result<CacheStore> {
        self.backend.create(name).await?;
        Ok(CacheStore::new(name, Arc::clone(&self.backend)))
    }

    /// Handle to a cache without creating it.
    pub fn handle(&self, name: &str) -> CacheStore {
        CacheStore::new(name, Arc::clone(&self.backend))
    }

    /// Check if cache exists.
    pub async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.keys().await?.iter().any(|n| n == name))
    }

    /// Delete a cache.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        self.backend.delete_cache(name).await
    }

    /// Get all cache names.
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.backend.cache_names().await
    }

    /// Delete every generation. Returns how many were removed.
    pub async fn delete_all(&self) -> Result<usize> {
        let mut removed = 0;
        for name in self.keys().await? {
            if self.delete(&name).await? {
                removed += 1;
            }
        }
        info!(removed, "Deleted all caches");
        Ok(removed)
    }

    /// Delete every generation except `current`. Returns the removed names.
    pub async fn delete_superseded(&self, current: &str) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for name in self.keys().await? {
            if name != current && self.delete(&name).await? {
                info!(cache = %name, "Deleted superseded cache");
                removed.push(name);
            }
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for CacheStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStorage").finish_non_exhaustive()
    }
}
