//! SQLite-based cache implementation.

use std::fmt::Display;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use tracing::{debug, info, instrument, warn};
use trade_core::cache::{StoredEntryInfo, plan_eviction};
use trade_core::{CacheEntry, CachePattern, CacheStats, ResponseCache, Result, TradeError};

use crate::DEFAULT_MAX_BYTES;

fn cache_err(e: impl Display) -> TradeError {
    TradeError::Cache(e.to_string())
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Outcome of reading one row.
enum Lookup {
    Hit(CacheEntry),
    Missing,
    Expired,
    Corrupt(serde_json::Error),
}

/// SQLite-based cache for raw provider responses.
///
/// Entries survive restarts. Opening a cache sweeps expired and unparseable
/// rows, so a crash mid-write never turns into a bad hit later. Queries run
/// on the blocking pool via `tokio::task::spawn_blocking`.
#[derive(Debug)]
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
    max_bytes: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SqliteCache {
    /// Open (or create) a cache database at the given path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or schema creation fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(cache_err)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory SQLite cache.
    ///
    /// Useful for testing; data is lost when the cache is dropped.
    ///
    /// # Errors
    /// Returns an error if schema creation fails.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(cache_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
            max_bytes: DEFAULT_MAX_BYTES,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };
        cache.initialize_schema()?;
        let removed = cache.repair()?;
        if removed > 0 {
            info!(removed, "Removed expired or corrupt rows from response cache");
        }
        Ok(cache)
    }

    /// Sets the size budget for stored entries.
    #[must_use]
    pub const fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// The configured size budget.
    #[must_use]
    pub const fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(cache_err)
    }

    /// Runs `f` against the connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(cache_err)?;
            f(&mut guard)
        })
        .await
        .map_err(cache_err)?
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS response_cache (
                key TEXT PRIMARY KEY,
                entry_json TEXT NOT NULL,
                stored_at_ms INTEGER NOT NULL,
                ttl_ms INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL
            )",
            [],
        )
        .map_err(cache_err)?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_response_cache_stored_at
             ON response_cache (stored_at_ms)",
            [],
        )
        .map_err(cache_err)?;
        Ok(())
    }

    /// Deletes expired rows and rows whose entry no longer parses.
    fn repair(&self) -> Result<usize> {
        let conn = self.lock()?;
        let expired = delete_expired(&conn)?;

        let corrupt: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT key, entry_json FROM response_cache")
                .map_err(cache_err)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
                .map_err(cache_err)?;
            rows.filter_map(std::result::Result::ok)
                .filter(|(_, json)| serde_json::from_str::<CacheEntry>(json).is_err())
                .map(|(key, _)| key)
                .collect()
        };
        for key in &corrupt {
            warn!(key = %key, "Dropping corrupt cache row");
            delete_key(&conn, key)?;
        }
        Ok(expired + corrupt.len())
    }

    fn miss(&self) -> Result<Option<CacheEntry>> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }
}

fn delete_key(conn: &Connection, key: &str) -> Result<usize> {
    conn.execute("DELETE FROM response_cache WHERE key = ?1", params![key])
        .map_err(cache_err)
}

fn delete_expired(conn: &Connection) -> Result<usize> {
    conn.execute(
        "DELETE FROM response_cache WHERE stored_at_ms + ttl_ms < ?1",
        params![Utc::now().timestamp_millis()],
    )
    .map_err(cache_err)
}

/// Reads one row, deleting it when it is expired or no longer parses.
fn lookup(conn: &Connection, key: &str) -> Result<Lookup> {
    let json: Option<String> = conn
        .query_row(
            "SELECT entry_json FROM response_cache WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(cache_err)?;

    let Some(json) = json else {
        return Ok(Lookup::Missing);
    };
    match serde_json::from_str::<CacheEntry>(&json) {
        Ok(entry) if !entry.is_expired() => Ok(Lookup::Hit(entry)),
        Ok(_) => {
            delete_key(conn, key)?;
            Ok(Lookup::Expired)
        }
        Err(e) => {
            delete_key(conn, key)?;
            Ok(Lookup::Corrupt(e))
        }
    }
}

/// Sizes of every row except `key`, which a replacement write supersedes.
fn stored_infos(tx: &Transaction<'_>, key: &str) -> Result<Vec<StoredEntryInfo>> {
    let mut stmt = tx
        .prepare("SELECT key, stored_at_ms, size_bytes FROM response_cache WHERE key <> ?1")
        .map_err(cache_err)?;
    let rows = stmt
        .query_map(params![key], |row| {
            Ok(StoredEntryInfo {
                key: row.get(0)?,
                stored_at: from_millis(row.get(1)?),
                size_bytes: row.get::<_, i64>(2)?.max(0) as u64,
            })
        })
        .map_err(cache_err)?;
    rows.collect::<std::result::Result<_, _>>()
        .map_err(cache_err)
}

/// Writes `entry` if it fits the budget after at most two eviction rounds.
///
/// The previous row for the key is only replaced once the new one fits.
fn store(
    conn: &mut Connection,
    entry: &CacheEntry,
    payload: &str,
    max_bytes: u64,
) -> Result<bool> {
    let size_bytes = payload.len() as u64;
    let ttl_ms = i64::try_from(entry.ttl.as_millis()).unwrap_or(i64::MAX);
    let tx = conn.transaction().map_err(cache_err)?;

    for attempt in 1..=2 {
        let infos = stored_infos(&tx, &entry.key)?;
        let evicted = plan_eviction(&infos, size_bytes, max_bytes);
        if !evicted.is_empty() {
            debug!(attempt, count = evicted.len(), "Evicting oldest cache entries");
        }
        for k in &evicted {
            delete_key(&tx, k)?;
        }

        let used: u64 = infos
            .iter()
            .filter(|i| !evicted.contains(&i.key))
            .map(|i| i.size_bytes)
            .sum();
        if used + size_bytes <= max_bytes {
            tx.execute(
                "INSERT OR REPLACE INTO response_cache
                 (key, entry_json, stored_at_ms, ttl_ms, size_bytes)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.key,
                    payload,
                    entry.stored_at.timestamp_millis(),
                    ttl_ms,
                    size_bytes as i64
                ],
            )
            .map_err(cache_err)?;
            tx.commit().map_err(cache_err)?;
            return Ok(true);
        }
    }

    tx.commit().map_err(cache_err)?;
    Ok(false)
}

fn invalidate_rows(conn: &Connection, pattern: &CachePattern) -> Result<usize> {
    match pattern {
        CachePattern::Key(key) => delete_key(conn, key),
        CachePattern::Substring(text) => conn
            .execute(
                "DELETE FROM response_cache WHERE instr(key, ?1) > 0",
                params![text],
            )
            .map_err(cache_err),
        CachePattern::Regex(_) => {
            let keys: Vec<String> = {
                let mut stmt = conn
                    .prepare("SELECT key FROM response_cache")
                    .map_err(cache_err)?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(cache_err)?;
                rows.filter_map(std::result::Result::ok)
                    .filter(|key| pattern.matches(key))
                    .collect()
            };
            for key in &keys {
                delete_key(conn, key)?;
            }
            Ok(keys.len())
        }
    }
}

#[async_trait]
impl ResponseCache for SqliteCache {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let owned = key.to_string();
        match self.with_conn(move |conn| lookup(conn, &owned)).await? {
            Lookup::Hit(entry) => {
                debug!("Cache hit");
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry))
            }
            Lookup::Missing => {
                debug!("Cache miss");
                self.miss()
            }
            Lookup::Expired => {
                debug!("Cache entry expired");
                self.miss()
            }
            Lookup::Corrupt(e) => {
                warn!(error = %e, "Corrupt cache entry removed");
                self.miss()
            }
        }
    }

    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn set(&self, key: &str, data: &str, ttl: Duration) -> Result<()> {
        let entry = CacheEntry::new(key, data, ttl);
        let payload = entry.to_json()?;
        let size_bytes = payload.len() as u64;
        let max_bytes = self.max_bytes;

        let stored = self
            .with_conn(move |conn| store(conn, &entry, &payload, max_bytes))
            .await?;
        if stored {
            debug!("Cached response");
        } else {
            debug!(size_bytes, max_bytes, "Entry exceeds cache budget, dropped");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn invalidate(&self, pattern: &CachePattern) -> Result<usize> {
        let pattern = pattern.clone();
        let removed = self
            .with_conn(move |conn| invalidate_rows(conn, &pattern))
            .await?;
        debug!(removed, "Invalidated cache entries");
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn sweep_expired(&self) -> Result<usize> {
        let removed = self.with_conn(|conn| delete_expired(conn)).await?;
        if removed > 0 {
            debug!("Swept {} expired cache entries", removed);
        }
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM response_cache", [])
                .map_err(cache_err)
        })
        .await?;
        debug!("Cleared all cache entries");
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let (count, total, oldest, newest) = self
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0), MIN(stored_at_ms), MAX(stored_at_ms)
                     FROM response_cache",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, Option<i64>>(2)?,
                            row.get::<_, Option<i64>>(3)?,
                        ))
                    },
                )
                .map_err(cache_err)
            })
            .await?;

        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: count.max(0) as usize,
            total_size_bytes: total.max(0) as u64,
            oldest: oldest.map(from_millis),
            newest: newest.map(from_millis),
            ..Default::default()
        }
        .with_rates())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_sqlite_cache_get_set() {
        let cache = SqliteCache::in_memory().unwrap();

        assert!(cache.get("comtrade:a").await.unwrap().is_none());

        cache.set("comtrade:a", r#"{"data":[]}"#, TTL).await.unwrap();
        let entry = cache.get("comtrade:a").await.unwrap().unwrap();
        assert_eq!(entry.data, r#"{"data":[]}"#);

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!(stats.total_size_bytes > 0);
        assert!(stats.oldest.is_some());
    }

    #[tokio::test]
    async fn test_sqlite_cache_expired_entry_is_a_miss() {
        let cache = SqliteCache::in_memory().unwrap();
        cache
            .set("k", "v", Duration::from_millis(50))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.get("k").await.unwrap().is_none());
        assert_eq!(cache.stats().await.unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn test_sqlite_cache_corrupt_row_is_a_miss_and_deleted() {
        let cache = SqliteCache::in_memory().unwrap();
        cache.set("k", "v", TTL).await.unwrap();
        cache
            .lock()
            .unwrap()
            .execute(
                "UPDATE response_cache SET entry_json = 'garbage' WHERE key = 'k'",
                [],
            )
            .unwrap();

        assert!(cache.get("k").await.unwrap().is_none());
        assert_eq!(cache.stats().await.unwrap().entry_count, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sqlite_cache_oversized_replacement_keeps_previous_value() {
        let small = CacheEntry::new("k", "v", TTL).to_json().unwrap().len() as u64;
        let cache = SqliteCache::in_memory().unwrap().with_max_bytes(small + 16);

        cache.set("k", "v", TTL).await.unwrap();
        cache.set("k", &"x".repeat(1000), TTL).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap().unwrap().data, "v");
        assert_eq!(cache.stats().await.unwrap().entry_count, 1);
    }

    #[tokio::test]
    async fn test_sqlite_cache_reopen_sweeps_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let cache = SqliteCache::new(&path).unwrap();
            cache.set("keep", "1", TTL).await.unwrap();
            cache
                .set("stale", "2", Duration::from_millis(10))
                .await
                .unwrap();
            cache.set("broken", "3", TTL).await.unwrap();
            cache
                .lock()
                .unwrap()
                .execute(
                    "UPDATE response_cache SET entry_json = '{' WHERE key = 'broken'",
                    [],
                )
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;

        let reopened = SqliteCache::new(&path).unwrap();
        let stats = reopened.stats().await.unwrap();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(reopened.get("keep").await.unwrap().unwrap().data, "1");
    }

    #[tokio::test]
    async fn test_sqlite_cache_eviction_and_invalidation() {
        let probe = CacheEntry::new("comtrade:0", "x".repeat(200), TTL)
            .to_json()
            .unwrap()
            .len() as u64;
        let cache = SqliteCache::in_memory()
            .unwrap()
            .with_max_bytes(probe * 4 + 20);

        for i in 0..5 {
            cache
                .set(&format!("comtrade:{i}"), &"x".repeat(200), TTL)
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stats = cache.stats().await.unwrap();
        assert!(stats.total_size_bytes <= cache.max_bytes());
        assert!(cache.get("comtrade:0").await.unwrap().is_none());
        assert!(cache.get("comtrade:4").await.unwrap().is_some());

        cache.set("worldbank:USA", "[]", TTL).await.unwrap();
        let removed = cache
            .invalidate(&CachePattern::provider("comtrade"))
            .await
            .unwrap();
        assert_eq!(removed, stats.entry_count);

        let re = regex::Regex::new(r"USA$").unwrap();
        assert_eq!(cache.invalidate(&re.into()).await.unwrap(), 1);
        assert_eq!(cache.stats().await.unwrap().entry_count, 0);
    }
}
