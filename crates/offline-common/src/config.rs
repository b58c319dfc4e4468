//! Worker configuration

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// How asset-like requests are served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetStrategy {
    /// Try the network, fall back to the cache when it fails.
    #[default]
    NetworkFirst,
    /// Serve a cache hit immediately and refresh it in the background.
    CacheFirst,
}

/// Offline worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Scope of the app; relative manifest entries resolve against it
    pub origin: Url,

    /// Cache name prefix, shared by every generation
    pub cache_prefix: String,

    /// Version tag embedded in the cache generation name
    pub version: String,

    /// Path of the primary document, relative to `origin`
    pub primary_document: String,

    /// Assets fetched into the cache at install time
    pub precache: Vec<String>,

    /// Policy for asset-like requests
    pub asset_strategy: AssetStrategy,

    /// Activate right after install instead of waiting for open tabs to close
    pub skip_waiting_on_install: bool,

    /// Where the disk backend keeps its generations
    pub storage_dir: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost:8080/").expect("static origin is valid"),
            cache_prefix: "offline-shell".to_string(),
            version: "v1".to_string(),
            primary_document: "./index.html".to_string(),
            precache: default_precache(),
            asset_strategy: AssetStrategy::default(),
            skip_waiting_on_install: true,
            storage_dir: None,
        }
    }
}

fn default_precache() -> Vec<String> {
    [
        "./",
        "./index.html",
        "./manifest.json",
        "./service-worker.js",
        "./icons/icon-180.png",
        "./icons/icon-192.png",
        "./icons/icon-512.png",
        "./docs/guide.pdf",
        "./docs/release-notes.pdf",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl WorkerConfig {
    /// Create a configuration for the given origin with default settings
    pub fn for_origin(origin: Url) -> Self {
        Self {
            origin,
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the worker cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.cache_prefix.trim().is_empty() {
            return Err(ConfigError::invalid("cache_prefix must not be empty"));
        }
        if self.version.trim().is_empty() {
            return Err(ConfigError::invalid("version must not be empty"));
        }
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(format!(
                "origin must be http or https, got {}",
                self.origin.scheme()
            )));
        }
        Ok(())
    }

    /// Name of the current cache generation
    pub fn cache_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.version)
    }

    /// Resolve a path from the manifest against the origin
    pub fn resolve(&self, path: &str) -> ConfigResult<Url> {
        Ok(self.origin.join(path)?)
    }

    /// Absolute URL of the primary document
    pub fn primary_document_url(&self) -> ConfigResult<Url> {
        self.resolve(&self.primary_document)
    }

    /// Whether a URL belongs to the configured origin
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    /// Storage directory, falling back to the platform cache directory
    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir
            .clone()
            .unwrap_or_else(|| default_storage_dir().join(&self.cache_prefix))
    }
}

/// Platform cache directory for offline-shell data
pub fn default_storage_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("offline-shell")
}
