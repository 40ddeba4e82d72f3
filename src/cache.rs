//! In-memory key/value store with per-entry expiry.
//!
//! The orchestrator memoizes each source's full result set here under
//! [`source_key`]. There is no eviction beyond TTL: the key space is one
//! entry per configured source.
//!
//! Reads after `expires_at` behave exactly like a miss; a stale value is never
//! returned. Writes replace the whole entry under the write lock, so a
//! concurrent reader sees either the old value or the new one.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::trace;

/// Cache key holding the article list for `source`.
pub fn source_key(source: &str) -> String {
    format!("source:{}:articles", source)
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
}

impl<V> Default for TtlCache<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the value for `key`, or `None` if absent or expired.
    pub async fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                trace!(%key, "cache entry expired");
                None
            }
            None => None,
        }
    }

    /// Store `value` under `key` for `ttl`, replacing any previous entry.
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    pub async fn delete(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    /// Drop every expired entry. Optional housekeeping; `get` already ignores them.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| now < e.expires_at);
        before - entries.len()
    }
}
