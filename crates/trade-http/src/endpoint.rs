//! Request descriptions and per-call transport options.

use std::fmt;
use std::time::Duration;

use crate::retry::Backoff;

/// A fully described provider call.
///
/// Headers carry credentials, so they are left out of both the cache key
/// and the `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Provider name; prefixes the cache key.
    pub provider: String,
    /// Absolute URL without query string.
    pub url: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("Endpoint")
            .field("provider", &self.provider)
            .field("url", &self.url)
            .field("query", &self.query)
            .field("headers", &header_names)
            .finish()
    }
}

impl Endpoint {
    /// An endpoint with no query parameters or headers.
    #[must_use]
    pub fn new(provider: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Adds a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// `provider:url?k=v&...` with parameters sorted, so parameter order
    /// never splits the cache.
    #[must_use]
    pub fn cache_key(&self) -> String {
        if self.query.is_empty() {
            return format!("{}:{}", self.provider, self.url);
        }
        let mut query: Vec<String> = self.query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        query.sort();
        format!("{}:{}?{}", self.provider, self.url, query.join("&"))
    }
}

/// Per-call transport settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RequestOptions {
    /// Timeout for each attempt.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// TTL of the cached response body.
    pub cache_ttl: Duration,
    /// Read from and write to the cache.
    pub use_cache: bool,
    /// Delay between attempts.
    pub backoff: Backoff,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            cache_ttl: Duration::from_secs(60 * 60),
            use_cache: true,
            backoff: Backoff::default(),
        }
    }
}

impl RequestOptions {
    /// Single uncached attempt with a short timeout, for liveness probes.
    #[must_use]
    pub fn probe() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 0,
            use_cache: false,
            ..Self::default()
        }
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the cache TTL.
    #[must_use]
    pub const fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    /// Enables or disables the cache for this call.
    #[must_use]
    pub const fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_sorts_query_and_ignores_headers() {
        let a = Endpoint::new("comtrade", "https://x/data")
            .with_query("reporterCode", "842")
            .with_query("period", "2022")
            .with_header("Ocp-Apim-Subscription-Key", "secret");
        let b = Endpoint::new("comtrade", "https://x/data")
            .with_query("period", "2022")
            .with_query("reporterCode", "842");

        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(
            a.cache_key(),
            "comtrade:https://x/data?period=2022&reporterCode=842"
        );
        assert!(!a.cache_key().contains("secret"));
    }

    #[test]
    fn test_debug_redacts_header_values() {
        let endpoint = Endpoint::new("comtrade", "https://x").with_header("key", "secret");
        let debug = format!("{endpoint:?}");
        assert!(debug.contains("key"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_probe_options() {
        let probe = RequestOptions::probe();
        assert_eq!(probe.max_retries, 0);
        assert_eq!(probe.timeout, Duration::from_secs(5));
        assert!(!probe.use_cache);
    }
}
