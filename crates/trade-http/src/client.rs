//! Transport client: cache, single-flight, timeout, classification, retry.

use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use trade_core::{CachePattern, DataSource, ResponseCache, Result, TradeError};

use crate::endpoint::{Endpoint, RequestOptions};
use crate::single_flight::SingleFlight;
use crate::stats::UsageStats;

/// Longest provider-suggested wait the retry loop will honour.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Longest slice of an error body kept in an error message.
const MAX_ERROR_BODY: usize = 200;

static RETRY_HINT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)try again in (\d+) seconds?").ok());

/// A decoded response plus its provenance.
#[derive(Clone, Debug, PartialEq)]
pub struct Fetched<T> {
    /// The decoded body.
    pub data: T,
    /// `Live` for a network response, `Cache` for a cache hit.
    pub source: DataSource,
    /// When the body was received from the network.
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    cache: Arc<dyn ResponseCache>,
    usage: UsageStats,
    flights: SingleFlight,
}

/// Shared HTTP transport for all providers.
///
/// Cloning is cheap; clones share the connection pool, the cache, the
/// in-flight registry and the usage counters.
#[derive(Clone, Debug)]
pub struct TransportClient {
    inner: Arc<Inner>,
}

impl TransportClient {
    /// A client backed by `cache`.
    ///
    /// # Errors
    /// Returns [`TradeError::Configuration`] if the HTTP client cannot be built.
    pub fn new(cache: Arc<dyn ResponseCache>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("trade/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TradeError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self::with_client(http, cache))
    }

    /// A client using a preconfigured `reqwest::Client`.
    #[must_use]
    pub fn with_client(http: Client, cache: Arc<dyn ResponseCache>) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                cache,
                usage: UsageStats::new(),
                flights: SingleFlight::default(),
            }),
        }
    }

    /// The response cache behind this client.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn ResponseCache> {
        &self.inner.cache
    }

    /// Per-provider usage counters.
    #[must_use]
    pub fn usage(&self) -> &UsageStats {
        &self.inner.usage
    }

    /// Fetches `endpoint` and decodes the body as `T`.
    ///
    /// Checks the cache first, joins an identical in-flight fetch if there
    /// is one, and otherwise calls the network with retries. Successful
    /// bodies are cached for `options.cache_ttl`.
    ///
    /// # Errors
    /// Returns the classified error of the last attempt, or
    /// [`TradeError::InvalidResponse`] if the body does not decode as `T`.
    #[instrument(
        skip(self, endpoint, options),
        fields(provider = %endpoint.provider, url = %endpoint.url)
    )]
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        options: &RequestOptions,
    ) -> Result<Fetched<T>> {
        let started = Instant::now();
        let result = self.request_inner(endpoint, options).await;
        let cache_hit = matches!(&result, Ok(f) if f.source == DataSource::Cache);
        self.inner.usage.record_outcome(
            &endpoint.provider,
            result.is_ok(),
            cache_hit,
            started.elapsed(),
        );
        result
    }

    async fn request_inner<T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        options: &RequestOptions,
    ) -> Result<Fetched<T>> {
        let key = endpoint.cache_key();

        if options.use_cache {
            if let Some(fetched) = self.cached(&key).await {
                return Ok(fetched);
            }
        }

        let (body, fetched_at) = if options.use_cache {
            let inner = Arc::clone(&self.inner);
            let owned_endpoint = endpoint.clone();
            let owned_options = *options;
            let (flight, leader) = self.inner.flights.join(&key, async move {
                let output = inner.fetch_with_retry(&owned_endpoint, &owned_options).await;
                if let Ok((body, _)) = &output {
                    inner.store(&owned_endpoint.cache_key(), body, owned_options.cache_ttl).await;
                }
                output
            });
            if !leader {
                debug!(key = %key, "Joined in-flight fetch");
            }
            flight.await?
        } else {
            self.inner.fetch_with_retry(endpoint, options).await?
        };

        match serde_json::from_str::<T>(&body) {
            Ok(data) => Ok(Fetched {
                data,
                source: DataSource::Live,
                fetched_at,
            }),
            Err(e) => {
                if options.use_cache {
                    self.drop_key(&key).await;
                }
                Err(TradeError::InvalidResponse(format!(
                    "{}: unexpected payload shape: {e}",
                    endpoint.provider
                )))
            }
        }
    }

    /// Looks `key` up in the cache. Cache faults and undecodable bodies are
    /// treated as misses; the latter are removed.
    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<Fetched<T>> {
        let entry = match self.inner.cache.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache lookup failed, fetching live");
                return None;
            }
        };

        match serde_json::from_str::<T>(&entry.data) {
            Ok(data) => {
                debug!(key = %key, "Serving cached response");
                Some(Fetched {
                    data,
                    source: DataSource::Cache,
                    fetched_at: entry.stored_at,
                })
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cached body no longer decodes, invalidating");
                self.drop_key(key).await;
                None
            }
        }
    }

    async fn drop_key(&self, key: &str) {
        if let Err(e) = self
            .inner
            .cache
            .invalidate(&CachePattern::Key(key.to_string()))
            .await
        {
            warn!(key = %key, error = %e, "Failed to invalidate cache entry");
        }
    }
}

impl Inner {
    async fn fetch_with_retry(
        &self,
        endpoint: &Endpoint,
        options: &RequestOptions,
    ) -> Result<(String, DateTime<Utc>)> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(endpoint, options.timeout).await {
                Ok(body) => return Ok((body, Utc::now())),
                Err(e) if e.is_retryable() && attempt < options.max_retries => {
                    let delay = e
                        .retry_after()
                        .map_or_else(|| options.backoff.delay(attempt), |d| d.min(MAX_RETRY_AFTER));
                    attempt += 1;
                    warn!(
                        provider = %endpoint.provider,
                        attempt,
                        max_retries = options.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Retrying request"
                    );
                    self.usage.record_retry(&endpoint.provider);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, endpoint: &Endpoint, timeout: Duration) -> Result<String> {
        debug!(provider = %endpoint.provider, url = %endpoint.url, "Issuing request");

        let mut request = self
            .http
            .get(&endpoint.url)
            .query(&endpoint.query)
            .timeout(timeout);
        for (name, value) in &endpoint.headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(&endpoint.provider, &e))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(&endpoint.provider, &e))?;

        if !status.is_success() {
            return Err(classify_status(
                &endpoint.provider,
                status.as_u16(),
                retry_after.as_deref(),
                &body,
            ));
        }

        if serde_json::from_str::<serde::de::IgnoredAny>(&body).is_err() {
            return Err(TradeError::InvalidResponse(format!(
                "{}: body is not JSON: {}",
                endpoint.provider,
                truncate(&body)
            )));
        }
        Ok(body)
    }

    async fn store(&self, key: &str, body: &str, ttl: Duration) {
        if let Err(e) = self.cache.set(key, body, ttl).await {
            warn!(key = %key, error = %e, "Failed to cache response");
        }
    }
}

/// Maps a non-success HTTP status to an error.
///
/// `retry_after` is the raw `Retry-After` header; for 429 responses without
/// one, a "try again in N seconds" hint in the body is used instead.
#[must_use]
pub fn classify_status(
    provider: &str,
    status: u16,
    retry_after: Option<&str>,
    body: &str,
) -> TradeError {
    match status {
        408 => TradeError::Network(format!("{provider}: request timed out (HTTP 408)")),
        429 => TradeError::RateLimited {
            provider: provider.to_string(),
            retry_after: retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .or_else(|| body_retry_hint(body))
                .map(Duration::from_secs),
        },
        401 | 403 => TradeError::Unauthorized {
            provider: provider.to_string(),
            status,
        },
        404 => TradeError::NotFound(format!("{provider}: {}", truncate(body))),
        _ => TradeError::ServerError {
            provider: provider.to_string(),
            status,
            message: truncate(body).to_string(),
        },
    }
}

fn body_retry_hint(body: &str) -> Option<u64> {
    let re = RETRY_HINT.as_ref()?;
    re.captures(body)?.get(1)?.as_str().parse().ok()
}

fn classify_transport(provider: &str, error: &reqwest::Error) -> TradeError {
    if error.is_timeout() {
        TradeError::Network(format!("{provider}: request timed out"))
    } else if error.is_connect() {
        TradeError::Network(format!("{provider}: connection failed: {error}"))
    } else {
        TradeError::Network(format!("{provider}: {error}"))
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use trade_cache::{InMemoryCache, NoopCache};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::retry::Backoff;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Payload {
        value: f64,
    }

    fn fast() -> RequestOptions {
        RequestOptions::default().with_backoff(Backoff::none())
    }

    fn endpoint(server: &MockServer) -> Endpoint {
        Endpoint::new("test", format!("{}/data", server.uri())).with_query("year", "2022")
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status("p", 408, None, ""),
            TradeError::Network(_)
        ));
        assert!(matches!(
            classify_status("p", 401, None, ""),
            TradeError::Unauthorized { status: 401, .. }
        ));
        assert!(matches!(
            classify_status("p", 403, None, ""),
            TradeError::Unauthorized { status: 403, .. }
        ));
        assert!(matches!(
            classify_status("p", 404, None, "missing"),
            TradeError::NotFound(_)
        ));

        let server = classify_status("p", 502, None, "bad gateway");
        assert!(server.is_retryable());
        let teapot = classify_status("p", 418, None, "");
        assert!(matches!(teapot, TradeError::ServerError { status: 418, .. }));
        assert!(!teapot.is_retryable());
    }

    #[test]
    fn test_rate_limit_hints() {
        let header = classify_status("p", 429, Some("7"), "");
        assert_eq!(header.retry_after(), Some(Duration::from_secs(7)));

        let body = classify_status(
            "p",
            429,
            None,
            "Rate limit is exceeded. Try again in 12 seconds.",
        );
        assert_eq!(body.retry_after(), Some(Duration::from_secs(12)));

        let none = classify_status("p", 429, None, "slow down");
        assert!(none.is_retryable());
        assert_eq!(none.retry_after(), None);
    }

    #[test_log::test(tokio::test)]
    async fn test_cache_hit_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .and(query_param("year", "2022"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"value": 1.5}"#))
            .expect(1)
            .mount(&server)
            .await;

        let client = TransportClient::new(Arc::new(InMemoryCache::default())).unwrap();
        let endpoint = endpoint(&server);

        let first: Fetched<Payload> = client.request(&endpoint, &fast()).await.unwrap();
        assert_eq!(first.source, DataSource::Live);
        assert_eq!(first.data, Payload { value: 1.5 });

        let second: Fetched<Payload> = client.request(&endpoint, &fast()).await.unwrap();
        assert_eq!(second.source, DataSource::Cache);
        assert_eq!(second.data, first.data);
        let cached = client
            .cache()
            .get(&endpoint.cache_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.fetched_at, cached.stored_at);

        let usage = &client.usage().snapshot()["test"];
        assert_eq!(usage.requests, 2);
        assert_eq!(usage.cache_hits, 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_retries_exhausted_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .expect(3)
            .mount(&server)
            .await;

        let client = TransportClient::new(Arc::new(NoopCache::new())).unwrap();
        let err = client
            .request::<Payload>(&endpoint(&server), &fast().with_max_retries(2))
            .await
            .unwrap_err();

        assert!(matches!(err, TradeError::ServerError { status: 503, .. }));
        let usage = &client.usage().snapshot()["test"];
        assert_eq!(usage.retries, 2);
        assert_eq!(usage.failures, 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = TransportClient::new(Arc::new(InMemoryCache::default())).unwrap();
        let err = client
            .request::<Payload>(&endpoint(&server), &fast())
            .await
            .unwrap_err();
        assert!(matches!(err, TradeError::NotFound(_)));
    }

    #[test_log::test(tokio::test)]
    async fn test_rate_limit_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"value": 2.0}"#))
            .expect(1)
            .mount(&server)
            .await;

        let client = TransportClient::new(Arc::new(InMemoryCache::default())).unwrap();
        let fetched = client
            .request::<Payload>(&endpoint(&server), &fast())
            .await
            .unwrap();
        assert_eq!(fetched.data.value, 2.0);
    }

    #[test_log::test(tokio::test)]
    async fn test_non_json_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(InMemoryCache::default());
        let client = TransportClient::new(cache.clone()).unwrap();
        let err = client
            .request::<Payload>(&endpoint(&server), &fast())
            .await
            .unwrap_err();
        assert!(matches!(err, TradeError::InvalidResponse(_)));
        assert_eq!(cache.stats().await.unwrap().entry_count, 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_unexpected_shape_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"other": true}"#))
            .expect(2)
            .mount(&server)
            .await;

        let client = TransportClient::new(Arc::new(InMemoryCache::default())).unwrap();
        for _ in 0..2 {
            let err = client
                .request::<Payload>(&endpoint(&server), &fast())
                .await
                .unwrap_err();
            assert!(matches!(err, TradeError::InvalidResponse(_)));
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_concurrent_cold_requests_share_one_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"value": 3.0}"#)
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = TransportClient::new(Arc::new(InMemoryCache::default())).unwrap();
        let endpoint = endpoint(&server);
        let options = fast();

        let results = futures::future::join_all(
            (0..5).map(|_| client.request::<Payload>(&endpoint, &options)),
        )
        .await;
        for result in results {
            assert_eq!(result.unwrap().data.value, 3.0);
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_headers_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("Ocp-Apim-Subscription-Key", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"value": 1.0}"#))
            .expect(1)
            .mount(&server)
            .await;

        let client = TransportClient::new(Arc::new(NoopCache::new())).unwrap();
        let endpoint = endpoint(&server).with_header("Ocp-Apim-Subscription-Key", "k");
        assert!(client.request::<Payload>(&endpoint, &RequestOptions::probe()).await.is_ok());
    }
}
