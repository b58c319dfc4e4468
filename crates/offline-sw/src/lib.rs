//! # Offline Service Worker
//!
//! The offline-caching layer of a single-page document viewer.
//!
//! ## Features
//!
//! - **Cache store**: versioned cache generations of request → response snapshots
//! - **Data stand**: one `{ updated, checked }` record derived from the
//!   primary document's `Last-Modified`, shared by every device
//! - **Fetch mediation**: network-first documents, configurable asset policy,
//!   cache fallback when offline
//! - **Client notification**: `CACHE_UPDATED` broadcasts and `CACHE_STATUS` replies
//!
//! ## Architecture
//!
//! ```text
//! Registration
//!     └── OfflineWorker (one per generation)
//!             ├── FetchMediator ── Fetcher (network)
//!             │       ├── CacheStore ── CacheBackend (memory / disk)
//!             │       └── MetadataStore (reserved entry in the same store)
//!             └── ClientNotifier
//!                     └── Client → page
//! ```

use offline_common::ConfigError;
use offline_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod fetch;
pub mod lifecycle;
pub mod messages;
pub mod metadata;
pub mod storage;
pub mod worker;

pub use cache::{CacheEntry, CacheStorage, CacheStore, MatchOptions};
pub use clients::{BroadcastReport, Client, ClientMatchOptions, ClientNotifier, ClientType};
pub use fetch::{FetchMediator, FetchOutcome, PrecacheReport, RequestClass};
pub use lifecycle::{ExtendableEvent, Registration, ServiceWorkerId, ServiceWorkerState};
pub use messages::{CacheStatusPayload, CacheUpdatedPayload, ClientCommand, WorkerMessage};
pub use metadata::{
    derive_updated_timestamp, format_timestamp, parse_last_modified, DerivedTimestamp,
    MetadataCheck, MetadataRecord, MetadataStore, META_KEY,
};
pub use storage::{CacheBackend, DiskBackend, MemoryBackend};
pub use worker::{ActivationReport, InstallReport, OfflineWorker};

// ==================== Errors ====================

/// Errors that can occur in worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt metadata: {0}")]
    CorruptMetadata(String),

    #[error("Delivery to client {0} failed")]
    Delivery(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ServiceWorkerError {
    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}

impl From<std::io::Error> for ServiceWorkerError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
