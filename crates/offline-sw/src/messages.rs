//! Page ↔ worker message protocol.
//!
//! ```text
//! page → worker   {"type":"SKIP_WAITING"} | {"type":"GET_CACHE_STATUS"} | {"type":"CLEAR_CACHES"}
//! worker → page   {"type":"CACHE_STATUS","payload":{"updated":..,"checked":..}}
//!                 {"type":"CACHE_STATUS","payload":{"error":true}}
//!                 {"type":"CACHE_UPDATED","payload":{"updated":..}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::metadata::MetadataRecord;

/// Commands a page can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientCommand {
    /// Activate the waiting worker now.
    SkipWaiting,
    /// Ask for the current data stand.
    GetCacheStatus,
    /// Drop every cache generation and restart the data stand.
    ClearCaches,
}

impl ClientCommand {
    /// Decode an inbound message; anything unrecognised is `None`.
    pub fn from_value(data: &JsonValue) -> Option<Self> {
        serde_json::from_value(data.clone()).ok()
    }
}

/// Messages the worker posts to pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    CacheStatus(CacheStatusPayload),
    CacheUpdated(CacheUpdatedPayload),
}

impl WorkerMessage {
    pub fn status(record: MetadataRecord) -> Self {
        Self::CacheStatus(CacheStatusPayload::Record(record))
    }

    pub fn status_error() -> Self {
        Self::CacheStatus(CacheStatusPayload::Error { error: true })
    }

    pub fn updated(updated: impl Into<String>) -> Self {
        Self::CacheUpdated(CacheUpdatedPayload {
            updated: updated.into(),
        })
    }

    /// Wire form.
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Payload of `CACHE_STATUS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheStatusPayload {
    // Listed first: a record would also accept `{"error":true}`.
    Error { error: bool },
    Record(MetadataRecord),
}

/// Payload of `CACHE_UPDATED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheUpdatedPayload {
    pub updated: String,
}
