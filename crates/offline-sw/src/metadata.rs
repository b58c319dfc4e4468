//! The data stand: when the origin's primary document last changed.
//!
//! The record lives in the current cache generation under [`META_KEY`],
//! a key no request URL can produce. Devices that see the same
//! `Last-Modified` header derive the same `updated` value, so they agree on
//! freshness without sharing a clock.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStore};
use crate::{Result, ServiceWorkerError};

/// Reserved cache key of the metadata record.
pub const META_KEY: &str = "__offline_shell_meta__";

/// `{ updated, checked }`, both ISO-8601 with milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// When the primary document last changed.
    pub updated: Option<String>,
    /// When the origin was last checked successfully.
    pub checked: Option<String>,
}

/// Result of [`derive_updated_timestamp`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedTimestamp {
    pub updated: String,
    pub changed: bool,
}

/// Outcome of one metadata check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataCheck {
    /// The record as written.
    pub record: MetadataRecord,
    /// Whether `updated` moved.
    pub changed: bool,
}

impl MetadataCheck {
    /// The `updated` value that was written.
    pub fn updated(&self) -> &str {
        self.record.updated.as_deref().unwrap_or_default()
    }
}

/// Render a timestamp the way the record stores it: `2024-01-01T00:00:00.000Z`.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a `Last-Modified` value. HTTP-dates first, then anything RFC 2822.
///
/// The day-of-week name is ignored: servers and hand-edited fixtures get it
/// wrong, and the date itself is what devices must agree on.
pub fn parse_last_modified(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(at) = httpdate::parse_http_date(value) {
        return Some(DateTime::<Utc>::from(at));
    }

    let without_weekday = match value.split_once(',') {
        Some((day, rest)) if day.chars().all(|c| c.is_ascii_alphabetic()) => rest.trim(),
        _ => value,
    };
    DateTime::parse_from_rfc2822(without_weekday)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Work out the new `updated` value.
///
/// A parsable header always wins. Without one, a previously known value is
/// kept; only a first-ever check falls back to `now`.
pub fn derive_updated_timestamp(
    last_modified: Option<&str>,
    previous: &MetadataRecord,
    now: DateTime<Utc>,
) -> DerivedTimestamp {
    let from_header = last_modified.and_then(parse_last_modified).map(format_timestamp);

    let updated = match (from_header, previous.updated.as_ref()) {
        (Some(updated), _) => updated,
        (None, Some(previous)) => previous.clone(),
        (None, None) => format_timestamp(now),
    };

    let changed = previous.updated.as_deref() != Some(updated.as_str());
    DerivedTimestamp { updated, changed }
}

/// Reads and writes the record in one cache generation.
#[derive(Debug)]
pub struct MetadataStore {
    cache: CacheStore,
    // Serializes read-modify-write cycles.
    lock: Mutex<()>,
}

impl MetadataStore {
    pub fn new(cache: CacheStore) -> Self {
        Self {
            cache,
            lock: Mutex::new(()),
        }
    }

    /// Current record. Absent or unparsable records read as the default;
    /// only a failing store is an error.
    pub async fn read(&self) -> Result<MetadataRecord> {
        let Some(entry) = self.cache.get_raw(META_KEY).await? else {
            return Ok(MetadataRecord::default());
        };
        match serde_json::from_slice(&entry.body) {
            Ok(record) => Ok(record),
            Err(e) => {
                let err = ServiceWorkerError::CorruptMetadata(e.to_string());
                warn!(cache = %self.cache.name(), error = %err, "Ignoring corrupt metadata");
                Ok(MetadataRecord::default())
            }
        }
    }

    /// Overwrite the record in a single store write.
    pub async fn write(&self, record: &MetadataRecord) -> Result<()> {
        let body = serde_json::to_vec(record)
            .map_err(|e| ServiceWorkerError::storage(e.to_string()))?;
        self.cache.put_raw(META_KEY, CacheEntry::json(META_KEY, body)).await
    }

    /// Record a successful check of the primary document.
    pub async fn record_check(
        &self,
        last_modified: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<MetadataCheck> {
        let _guard = self.lock.lock().await;

        let previous = self.read().await?;
        let derived = derive_updated_timestamp(last_modified, &previous, now);
        let record = MetadataRecord {
            updated: Some(derived.updated),
            checked: Some(format_timestamp(now)),
        };
        self.write(&record).await?;

        if derived.changed {
            info!(updated = ?record.updated, previous = ?previous.updated, "Data stand changed");
        } else {
            debug!(checked = ?record.checked, "Data stand unchanged");
        }

        Ok(MetadataCheck {
            record,
            changed: derived.changed,
        })
    }

    /// Keep the known record when the origin is unreachable. A worker that
    /// has never seen the origin starts its data stand now.
    pub async fn record_offline(&self, now: DateTime<Utc>) -> Result<MetadataCheck> {
        let _guard = self.lock.lock().await;

        let previous = self.read().await?;
        if previous.updated.is_some() {
            return Ok(MetadataCheck {
                record: previous,
                changed: false,
            });
        }

        let stamp = format_timestamp(now);
        let record = MetadataRecord {
            updated: Some(stamp.clone()),
            checked: Some(stamp),
        };
        self.write(&record).await?;
        Ok(MetadataCheck {
            record,
            changed: true,
        })
    }

    /// Adopt a record carried over from an older generation. Only takes
    /// effect while this generation has no `updated` value of its own.
    pub async fn seed(&self, record: MetadataRecord) -> Result<bool> {
        let _guard = self.lock.lock().await;

        if self.read().await?.updated.is_some() || record.updated.is_none() {
            return Ok(false);
        }
        self.write(&record).await?;
        debug!(cache = %self.cache.name(), updated = ?record.updated, "Data stand inherited");
        Ok(true)
    }

    /// Start over with a fresh `{ now, now }` pair.
    pub async fn reset(&self, now: DateTime<Utc>) -> Result<MetadataRecord> {
        let _guard = self.lock.lock().await;

        let stamp = format_timestamp(now);
        let record = MetadataRecord {
            updated: Some(stamp.clone()),
            checked: Some(stamp),
        };
        self.write(&record).await?;
        Ok(record)
    }
}
