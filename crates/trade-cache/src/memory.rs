//! In-memory cache implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use trade_core::cache::{StoredEntryInfo, plan_eviction};
use trade_core::{CacheEntry, CachePattern, CacheStats, ResponseCache, Result};

use crate::DEFAULT_MAX_BYTES;

/// A serialized entry plus the metadata needed for eviction and stats.
#[derive(Debug, Clone)]
struct StoredEntry {
    payload: String,
    stored_at: DateTime<Utc>,
    ttl: Duration,
    size_bytes: u64,
    generation: u64,
}

impl StoredEntry {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let ttl = chrono::TimeDelta::from_std(self.ttl).unwrap_or(chrono::TimeDelta::MAX);
        now.signed_duration_since(self.stored_at) > ttl
    }
}

/// Process-local cache bounded by a byte budget.
///
/// Entries are kept serialized so their size is what a persistent backend
/// would store. Data is lost when the cache is dropped.
#[derive(Debug)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, StoredEntry>>,
    max_bytes: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BYTES)
    }
}

impl InMemoryCache {
    /// Create an empty cache holding at most `max_bytes` of serialized entries.
    #[must_use]
    pub fn new(max_bytes: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// The configured size budget.
    #[must_use]
    pub const fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn miss(&self) -> Result<Option<CacheEntry>> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    /// Removes `key` only if it still holds the write identified by `generation`.
    async fn remove_if_current(&self, key: &str, generation: u64) -> bool {
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.generation == generation) {
            entries.remove(key);
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl ResponseCache for InMemoryCache {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let stored = self.entries.read().await.get(key).cloned();
        let Some(stored) = stored else {
            debug!("Cache miss");
            return self.miss();
        };

        match serde_json::from_str::<CacheEntry>(&stored.payload) {
            Ok(entry) if !entry.is_expired() => {
                debug!("Cache hit");
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry))
            }
            Ok(_) => {
                debug!("Cache entry expired");
                self.remove_if_current(key, stored.generation).await;
                self.miss()
            }
            Err(e) => {
                warn!(error = %e, "Corrupt cache entry removed");
                self.remove_if_current(key, stored.generation).await;
                self.miss()
            }
        }
    }

    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn set(&self, key: &str, data: &str, ttl: Duration) -> Result<()> {
        let entry = CacheEntry::new(key, data, ttl);
        let payload = entry.to_json()?;
        let size_bytes = payload.len() as u64;

        let mut entries = self.entries.write().await;

        // The current value for `key` stays until the replacement is known to fit.
        for attempt in 1..=2 {
            let infos: Vec<StoredEntryInfo> = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, e)| StoredEntryInfo {
                    key: k.clone(),
                    stored_at: e.stored_at,
                    size_bytes: e.size_bytes,
                })
                .collect();

            let evicted = plan_eviction(&infos, size_bytes, self.max_bytes);
            if !evicted.is_empty() {
                debug!(attempt, count = evicted.len(), "Evicting oldest cache entries");
            }
            for k in &evicted {
                entries.remove(k);
            }

            let used: u64 = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, e)| e.size_bytes)
                .sum();
            if used + size_bytes <= self.max_bytes {
                entries.insert(
                    key.to_string(),
                    StoredEntry {
                        payload,
                        stored_at: entry.stored_at,
                        ttl,
                        size_bytes,
                        generation: self.writes.fetch_add(1, Ordering::Relaxed),
                    },
                );
                debug!("Cached response");
                return Ok(());
            }
        }

        debug!(size_bytes, max_bytes = self.max_bytes, "Entry exceeds cache budget, dropped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn invalidate(&self, pattern: &CachePattern) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !pattern.matches(key));
        let removed = before - entries.len();
        debug!(removed, "Invalidated cache entries");
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn sweep_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Swept {} expired cache entries", removed);
        }
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        debug!("Cleared all cache entries");
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let entries = self.entries.read().await;
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: entries.len(),
            total_size_bytes: entries.values().map(|e| e.size_bytes).sum(),
            oldest: entries.values().map(|e| e.stored_at).min(),
            newest: entries.values().map(|e| e.stored_at).max(),
            ..Default::default()
        }
        .with_rates())
    }
}
