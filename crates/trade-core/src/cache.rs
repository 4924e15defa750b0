//! Cache trait for storing raw provider responses.
//!
//! This module defines the [`ResponseCache`] trait, the [`CacheEntry`] it
//! stores, the [`CachePattern`] used for targeted invalidation, and the batch
//! eviction planner shared by every size-bounded backend.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Fraction of the current entries removed by one eviction batch.
pub const EVICTION_FRACTION: f64 = 0.25;

/// A cached payload with its time-to-live.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key.
    pub key: String,
    /// Opaque payload (the raw response body).
    pub data: String,
    /// When the entry was written.
    pub stored_at: DateTime<Utc>,
    /// How long the entry stays fresh.
    pub ttl: Duration,
}

impl CacheEntry {
    /// Creates an entry stored now.
    #[must_use]
    pub fn new(key: impl Into<String>, data: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            data: data.into(),
            stored_at: Utc::now(),
            ttl,
        }
    }

    /// True once `now - stored_at > ttl`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(self.stored_at) > ttl
    }

    /// True if the entry has expired as of the current time.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Serialized form, whose length is the entry's size.
    ///
    /// # Errors
    /// Returns [`TradeError::Cache`](crate::TradeError::Cache) if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| crate::TradeError::Cache(e.to_string()))
    }
}

/// Selects the keys removed by [`ResponseCache::invalidate`].
#[derive(Clone, Debug)]
pub enum CachePattern {
    /// Exactly this key.
    Key(String),
    /// Every key containing this text.
    Substring(String),
    /// Every key matching this expression.
    Regex(Regex),
}

impl CachePattern {
    /// Matches every key belonging to `provider`.
    #[must_use]
    pub fn provider(provider: &str) -> Self {
        Self::Substring(format!("{provider}:"))
    }

    /// Returns true if `key` is selected.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Key(k) => k == key,
            Self::Substring(s) => key.contains(s.as_str()),
            Self::Regex(re) => re.is_match(key),
        }
    }
}

impl From<Regex> for CachePattern {
    fn from(re: Regex) -> Self {
        Self::Regex(re)
    }
}

/// Hit/miss counters and occupancy of a cache.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that missed.
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0 with no lookups.
    pub hit_rate: f64,
    /// `misses / (hits + misses)`, or 0 with no lookups.
    pub miss_rate: f64,
    /// Number of stored entries.
    pub entry_count: usize,
    /// Serialized size of all entries in bytes.
    pub total_size_bytes: u64,
    /// Oldest `stored_at`.
    pub oldest: Option<DateTime<Utc>>,
    /// Newest `stored_at`.
    pub newest: Option<DateTime<Utc>>,
}

impl CacheStats {
    /// Fills in the rates from the counters.
    #[must_use]
    pub fn with_rates(mut self) -> Self {
        let lookups = self.hits + self.misses;
        if lookups > 0 {
            self.hit_rate = self.hits as f64 / lookups as f64;
            self.miss_rate = self.misses as f64 / lookups as f64;
        }
        self
    }
}

/// Trait for caching raw provider responses.
///
/// Implementations must tolerate concurrent use and never surface a corrupt
/// or expired entry as a hit.
#[async_trait]
pub trait ResponseCache: Send + Sync + Debug {
    /// Returns the live entry for `key`.
    ///
    /// Returns `Ok(None)` for absent, expired or corrupt entries; the latter
    /// two are deleted as a side effect.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Stores `data` under `key` for `ttl`, evicting old entries first when
    /// the write would exceed the size budget.
    async fn set(&self, key: &str, data: &str, ttl: Duration) -> Result<()>;

    /// Removes every entry selected by `pattern`.
    ///
    /// Returns the number of entries removed.
    async fn invalidate(&self, pattern: &CachePattern) -> Result<usize>;

    /// Removes every expired entry.
    ///
    /// Returns the number of entries removed.
    async fn sweep_expired(&self) -> Result<usize>;

    /// Clears all cached data.
    async fn clear(&self) -> Result<()>;

    /// Current counters and occupancy.
    async fn stats(&self) -> Result<CacheStats>;
}

/// Size and age of one stored entry, as seen by the eviction planner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEntryInfo {
    /// Cache key.
    pub key: String,
    /// When the entry was written.
    pub stored_at: DateTime<Utc>,
    /// Serialized size in bytes.
    pub size_bytes: u64,
}

/// Chooses which entries to evict so that `incoming` more bytes fit in `max_bytes`.
///
/// Returns an empty list when the write already fits. Otherwise evicts
/// oldest-first, at least a quarter of the current entries (rounded up),
/// continuing until the write fits or nothing is left.
#[must_use]
pub fn plan_eviction(entries: &[StoredEntryInfo], incoming: u64, max_bytes: u64) -> Vec<String> {
    let mut total: u64 = entries.iter().map(|e| e.size_bytes).sum();
    if total + incoming <= max_bytes || entries.is_empty() {
        return Vec::new();
    }

    let mut by_age: Vec<&StoredEntryInfo> = entries.iter().collect();
    by_age.sort_by(|a, b| a.stored_at.cmp(&b.stored_at).then_with(|| a.key.cmp(&b.key)));

    let batch = (entries.len() as f64 * EVICTION_FRACTION).ceil() as usize;
    let mut evicted = Vec::new();
    for entry in by_age {
        if evicted.len() >= batch && total + incoming <= max_bytes {
            break;
        }
        total -= entry.size_bytes;
        evicted.push(entry.key.clone());
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(key: &str, secs: i64, size: u64) -> StoredEntryInfo {
        StoredEntryInfo {
            key: key.to_string(),
            stored_at: DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(secs),
            size_bytes: size,
        }
    }

    #[test]
    fn test_entry_expiry_boundary() {
        let mut entry = CacheEntry::new("k", "v", Duration::from_secs(10));
        let t0 = DateTime::<Utc>::UNIX_EPOCH;
        entry.stored_at = t0;

        assert!(!entry.is_expired_at(t0 + TimeDelta::milliseconds(9_999)));
        assert!(!entry.is_expired_at(t0 + TimeDelta::seconds(10)));
        assert!(entry.is_expired_at(t0 + TimeDelta::milliseconds(10_001)));
    }

    #[test]
    fn test_patterns() {
        assert!(CachePattern::Key("a:b".into()).matches("a:b"));
        assert!(!CachePattern::Key("a:b".into()).matches("a:bc"));
        assert!(CachePattern::provider("comtrade").matches("comtrade:https://x?y=1"));
        assert!(!CachePattern::provider("comtrade").matches("worldbank:https://x"));
        let re = CachePattern::from(Regex::new(r"reporterCode=842").unwrap());
        assert!(re.matches("comtrade:https://x?period=2022&reporterCode=842"));
    }

    #[test]
    fn test_stats_rates() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        }
        .with_rates();
        assert_eq!(stats.hit_rate, 0.75);
        assert_eq!(stats.miss_rate, 0.25);
        assert_eq!(CacheStats::default().with_rates().hit_rate, 0.0);
    }

    #[test]
    fn test_no_eviction_when_write_fits() {
        let entries = vec![info("a", 1, 10), info("b", 2, 10)];
        assert!(plan_eviction(&entries, 10, 100).is_empty());
    }

    #[test]
    fn test_eviction_removes_at_least_a_quarter_oldest_first() {
        let entries: Vec<StoredEntryInfo> = (0..8)
            .map(|i| info(&format!("k{i}"), 100 - i64::from(i), 10))
            .collect();
        // One eviction would make room, but a batch removes ceil(8 * 0.25) = 2.
        let evicted = plan_eviction(&entries, 10, 85);
        assert_eq!(evicted, vec!["k7".to_string(), "k6".to_string()]);
    }

    #[test]
    fn test_eviction_continues_until_write_fits() {
        let entries = vec![info("old", 1, 40), info("mid", 2, 40), info("new", 3, 40)];
        let evicted = plan_eviction(&entries, 50, 100);
        let remaining: u64 = entries
            .iter()
            .filter(|e| !evicted.contains(&e.key))
            .map(|e| e.size_bytes)
            .sum();
        assert_eq!(evicted, vec!["old".to_string(), "mid".to_string()]);
        assert!(remaining + 50 <= 100);
    }

    #[test]
    fn test_eviction_of_oversized_write_empties_cache() {
        let entries = vec![info("a", 1, 10), info("b", 2, 10)];
        let evicted = plan_eviction(&entries, 500, 100);
        assert_eq!(evicted.len(), 2);
    }
}
