//! Deduplication of concurrent fetches for the same cache key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use trade_core::{Result, TradeError};

/// Outcome of one network fetch: the raw body and when it was received.
pub(crate) type FetchOutput = Result<(String, DateTime<Utc>)>;

type SharedFetch = Shared<BoxFuture<'static, FetchOutput>>;

/// In-flight fetches keyed by cache key.
///
/// The fetch itself runs on a spawned task, so it finishes and fills the
/// cache even when every waiting caller has been dropped. The task removes
/// its own registry entry when done.
#[derive(Debug, Default)]
pub(crate) struct SingleFlight {
    inflight: Arc<Mutex<HashMap<String, (u64, SharedFetch)>>>,
    next_id: AtomicU64,
}

impl SingleFlight {
    /// Joins the in-flight fetch for `key`, or starts `fetch` if there is none.
    ///
    /// The boolean is true for the caller that started the fetch.
    pub(crate) fn join<F>(&self, key: &str, fetch: F) -> (SharedFetch, bool)
    where
        F: Future<Output = FetchOutput> + Send + 'static,
    {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, shared)) = inflight.get(key) {
            return (shared.clone(), false);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.inflight);
        let owned_key = key.to_string();
        let handle = tokio::spawn(async move {
            let output = fetch.await;
            let mut inflight = registry.lock().unwrap_or_else(PoisonError::into_inner);
            if inflight.get(&owned_key).is_some_and(|(owner, _)| *owner == id) {
                inflight.remove(&owned_key);
            }
            output
        });

        let shared = async move {
            handle
                .await
                .map_err(|e| TradeError::Network(format!("fetch task failed: {e}")))?
        }
        .boxed()
        .shared();

        inflight.insert(key.to_string(), (id, shared.clone()));
        (shared, true)
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let flights = SingleFlight::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let make = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(("body".to_string(), Utc::now()))
        };

        let (a, leader_a) = flights.join("k", make(Arc::clone(&calls)));
        let (b, leader_b) = flights.join("k", make(Arc::clone(&calls)));
        assert!(leader_a);
        assert!(!leader_b);

        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra.unwrap().0, "body");
        assert_eq!(rb.unwrap().0, "body");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::task::yield_now().await;
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_fetch_completes_when_callers_drop() {
        let flights = SingleFlight::default();
        let done = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&done);

        let (shared, _) = flights.join("k", async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.fetch_add(1, Ordering::SeqCst);
            Ok((String::new(), Utc::now()))
        });
        drop(shared);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }
}
