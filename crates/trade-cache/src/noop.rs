//! No-op cache implementation.

use std::time::Duration;

use async_trait::async_trait;
use trade_core::{CacheEntry, CachePattern, CacheStats, ResponseCache, Result};

/// A cache that stores nothing.
///
/// Every lookup misses, so every request goes to the network. Useful for
/// health probes and for tests that must observe each transport attempt.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl NoopCache {
    /// Create a new no-op cache.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResponseCache for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<CacheEntry>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _data: &str, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn invalidate(&self, _pattern: &CachePattern) -> Result<usize> {
        Ok(0)
    }

    async fn sweep_expired(&self) -> Result<usize> {
        Ok(0)
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_cache_always_misses() {
        let cache = NoopCache::new();
        cache
            .set("comtrade:x", "{}", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.get("comtrade:x").await.unwrap().is_none());
        assert_eq!(cache.stats().await.unwrap().entry_count, 0);
    }
}
