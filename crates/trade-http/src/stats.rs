//! Per-provider usage counters.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Counters for one provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProviderUsage {
    /// Calls made through the transport.
    pub requests: u64,
    /// Calls that returned data.
    pub successes: u64,
    /// Calls that returned an error.
    pub failures: u64,
    /// Calls answered from the cache.
    pub cache_hits: u64,
    /// Retry attempts after a failed attempt.
    pub retries: u64,
    /// Summed wall time of all calls, in milliseconds.
    pub total_latency_ms: u64,
}

impl ProviderUsage {
    /// Mean latency per call, or zero before the first call.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        if self.requests == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.total_latency_ms / self.requests)
    }
}

/// Thread-safe usage registry keyed by provider name.
#[derive(Debug, Default)]
pub struct UsageStats {
    providers: Mutex<HashMap<String, ProviderUsage>>,
}

impl UsageStats {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, provider: &str, f: impl FnOnce(&mut ProviderUsage)) {
        // Counters stay usable after a panic elsewhere.
        let mut providers = self
            .providers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(providers.entry(provider.to_string()).or_default());
    }

    pub(crate) fn record_retry(&self, provider: &str) {
        self.update(provider, |u| u.retries += 1);
    }

    pub(crate) fn record_outcome(
        &self,
        provider: &str,
        ok: bool,
        cache_hit: bool,
        latency: Duration,
    ) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.update(provider, |u| {
            u.requests += 1;
            if ok {
                u.successes += 1;
            } else {
                u.failures += 1;
            }
            if cache_hit {
                u.cache_hits += 1;
            }
            u.total_latency_ms = u.total_latency_ms.saturating_add(millis);
        });
    }

    /// A copy of all counters, ordered by provider name.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, ProviderUsage> {
        self.providers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
