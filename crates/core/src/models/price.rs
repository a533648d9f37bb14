use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::errors::CoreError;

/// Stand-in lifetime for TTLs too large to add to the current instant.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A cached payload and the instant after which it must no longer be served.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-wide market-data cache with per-entry expiry.
///
/// Values are stored as opaque JSON so one cache can hold prices, quotes,
/// overviews and search results side by side. Keys are namespaced by data
/// kind (`price:AAPL`, `overview:AAPL`, `search:apple`).
///
/// Expired entries are never returned: reads evict them lazily, and
/// [`purge_expired`](Self::purge_expired) sweeps the whole map. There is no
/// per-entry locking; concurrent writers to the same key simply overwrite
/// each other, which is fine for interchangeable point-in-time snapshots.
///
/// Time comes from `tokio::time::Instant`, so tests running on a paused
/// runtime can advance the clock deterministically.
#[derive(Debug, Default)]
pub struct PriceCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a fresh value and decode it as `T`.
    ///
    /// Returns `None` when the key is absent, expired, or holds a payload of a
    /// different shape (the latter is logged).
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        {
            let entries = self.read();
            match entries.get(key) {
                Some(entry) if entry.is_fresh(now) => {
                    return match serde_json::from_value(entry.value.clone()) {
                        Ok(value) => Some(value),
                        Err(e) => {
                            warn!("Cache entry {key} has an unexpected shape: {e}");
                            None
                        }
                    };
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: evict unless another writer refreshed it in the meantime.
        let mut entries = self.write();
        if entries.get(key).is_some_and(|e| !e.is_fresh(now)) {
            entries.remove(key);
            debug!("Evicted expired cache entry {key}");
        }
        None
    }

    /// Store `value` under `key` for `ttl`. Overwrites any existing entry.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), CoreError> {
        let value = serde_json::to_value(value)
            .map_err(|e| CoreError::Serialization(format!("Failed to cache {key}: {e}")))?;
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .or_else(|| now.checked_add(MAX_TTL))
            .unwrap_or(now);
        let entry = CacheEntry { value, expires_at };
        self.write().insert(key.to_string(), entry);
        Ok(())
    }

    /// Remove an entry. Returns `true` if something was removed.
    pub fn remove(&self, key: &str) -> bool {
        self.write().remove(key).is_some()
    }

    /// Check whether a fresh entry exists without decoding it.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.read().get(key).is_some_and(|e| e.is_fresh(now))
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, e| e.is_fresh(now));
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    // A writer panicking mid-insert leaves the map itself intact.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(|poisoned| {
            warn!("Price cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.write().unwrap_or_else(|poisoned| {
            warn!("Price cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
