//! Aggregator configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{Datelike, Utc};
use trade_cache::DEFAULT_MAX_BYTES;
use trade_comtrade::COMTRADE_BASE_URL;
use trade_core::validation::DEFAULT_STALE_AFTER;
use trade_core::{Result, TradeError};
use trade_http::RequestOptions;
use trade_worldbank::WORLDBANK_BASE_URL;

/// Default cache lifetime of a provider response.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Default per-call network timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default retry budget per call.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default number of provider calls in flight per aggregate query.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Settings of a [`TradeAggregator`](crate::TradeAggregator).
///
/// The defaults need no environment at all: live data is off and fallback
/// is on, so every query answers with synthetic data.
#[derive(Clone, PartialEq, Eq)]
pub struct TradeConfig {
    /// Query providers over the network.
    pub live_data: bool,
    /// Answer with synthetic data instead of failing.
    pub fallback_on_error: bool,
    /// Lifetime of cached provider responses.
    pub cache_ttl: Duration,
    /// Byte budget of the response cache.
    pub max_cache_bytes: u64,
    /// Persistent cache file. `None` keeps the cache in memory.
    pub cache_path: Option<PathBuf>,
    /// Per-call network timeout.
    pub request_timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Provider calls in flight per aggregate query.
    pub max_concurrency: usize,
    /// Age beyond which data is flagged as stale.
    pub stale_after: Duration,
    /// Latest year queried; the year before it is fetched for growth.
    pub reference_year: i32,
    /// Comtrade subscription key.
    pub comtrade_api_key: Option<String>,
    /// Comtrade base URL.
    pub comtrade_base_url: String,
    /// World Bank base URL.
    pub worldbank_base_url: String,
}

impl fmt::Debug for TradeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TradeConfig")
            .field("live_data", &self.live_data)
            .field("fallback_on_error", &self.fallback_on_error)
            .field("cache_ttl", &self.cache_ttl)
            .field("max_cache_bytes", &self.max_cache_bytes)
            .field("cache_path", &self.cache_path)
            .field("request_timeout", &self.request_timeout)
            .field("max_retries", &self.max_retries)
            .field("max_concurrency", &self.max_concurrency)
            .field("stale_after", &self.stale_after)
            .field("reference_year", &self.reference_year)
            .field(
                "comtrade_api_key",
                &self.comtrade_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("comtrade_base_url", &self.comtrade_base_url)
            .field("worldbank_base_url", &self.worldbank_base_url)
            .finish()
    }
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            live_data: false,
            fallback_on_error: true,
            cache_ttl: DEFAULT_CACHE_TTL,
            max_cache_bytes: DEFAULT_MAX_BYTES,
            cache_path: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            stale_after: DEFAULT_STALE_AFTER,
            // Annual trade data lags by about two years.
            reference_year: Utc::now().year() - 2,
            comtrade_api_key: None,
            comtrade_base_url: COMTRADE_BASE_URL.to_string(),
            worldbank_base_url: WORLDBANK_BASE_URL.to_string(),
        }
    }
}

impl TradeConfig {
    /// Reads the configuration from `TRADE_*`, `COMTRADE_*` and
    /// `WORLDBANK_*` environment variables.
    ///
    /// # Errors
    /// Returns [`TradeError::Configuration`] for a value that does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value. Unset variables keep their defaults.
    ///
    /// # Errors
    /// Returns [`TradeError::Configuration`] for a value that does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(v) = var("TRADE_LIVE_DATA") {
            config.live_data = parse_bool("TRADE_LIVE_DATA", &v)?;
        }
        if let Some(v) = var("TRADE_FALLBACK") {
            config.fallback_on_error = parse_bool("TRADE_FALLBACK", &v)?;
        }
        if let Some(v) = var("TRADE_CACHE_TTL_SECS") {
            config.cache_ttl = Duration::from_secs(parse("TRADE_CACHE_TTL_SECS", &v)?);
        }
        if let Some(v) = var("TRADE_CACHE_MAX_BYTES") {
            config.max_cache_bytes = parse("TRADE_CACHE_MAX_BYTES", &v)?;
        }
        if let Some(v) = var("TRADE_CACHE_PATH") {
            config.cache_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("TRADE_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(parse("TRADE_REQUEST_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = var("TRADE_MAX_RETRIES") {
            config.max_retries = parse("TRADE_MAX_RETRIES", &v)?;
        }
        if let Some(v) = var("TRADE_MAX_CONCURRENCY") {
            config.max_concurrency = parse("TRADE_MAX_CONCURRENCY", &v)?;
        }
        if let Some(v) = var("TRADE_STALE_AFTER_SECS") {
            config.stale_after = Duration::from_secs(parse("TRADE_STALE_AFTER_SECS", &v)?);
        }
        if let Some(v) = var("TRADE_REFERENCE_YEAR") {
            config.reference_year = parse("TRADE_REFERENCE_YEAR", &v)?;
        }
        config.comtrade_api_key = var("COMTRADE_API_KEY");
        if let Some(v) = var("COMTRADE_BASE_URL") {
            config.comtrade_base_url = v;
        }
        if let Some(v) = var("WORLDBANK_BASE_URL") {
            config.worldbank_base_url = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks values that parse but cannot work.
    ///
    /// # Errors
    /// Returns [`TradeError::Configuration`] naming the offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(TradeError::Configuration(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(TradeError::Configuration(
                "request_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Enables or disables live provider calls.
    #[must_use]
    pub const fn with_live_data(mut self, live_data: bool) -> Self {
        self.live_data = live_data;
        self
    }

    /// Enables or disables synthetic fallback data.
    #[must_use]
    pub const fn with_fallback(mut self, fallback_on_error: bool) -> Self {
        self.fallback_on_error = fallback_on_error;
        self
    }

    /// Sets the cache lifetime of provider responses.
    #[must_use]
    pub const fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    /// Sets the cache byte budget.
    #[must_use]
    pub const fn with_max_cache_bytes(mut self, max_cache_bytes: u64) -> Self {
        self.max_cache_bytes = max_cache_bytes;
        self
    }

    /// Persists the cache to `path`.
    #[must_use]
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Sets the per-call network timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Sets the retry budget per call.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the number of provider calls in flight per query.
    #[must_use]
    pub const fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Sets the staleness threshold.
    #[must_use]
    pub const fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Sets the latest year queried.
    #[must_use]
    pub const fn with_reference_year(mut self, reference_year: i32) -> Self {
        self.reference_year = reference_year;
        self
    }

    /// Sets the Comtrade subscription key.
    #[must_use]
    pub fn with_comtrade_api_key(mut self, key: impl Into<String>) -> Self {
        self.comtrade_api_key = Some(key.into());
        self
    }

    /// Points the Comtrade provider at `url`.
    #[must_use]
    pub fn with_comtrade_base_url(mut self, url: impl Into<String>) -> Self {
        self.comtrade_base_url = url.into();
        self
    }

    /// Points the World Bank provider at `url`.
    #[must_use]
    pub fn with_worldbank_base_url(mut self, url: impl Into<String>) -> Self {
        self.worldbank_base_url = url.into();
        self
    }

    /// Per-call options for query traffic.
    #[must_use]
    pub fn request_options(&self) -> RequestOptions {
        RequestOptions::default()
            .with_timeout(self.request_timeout)
            .with_max_retries(self.max_retries)
            .with_cache_ttl(self.cache_ttl)
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .parse()
        .map_err(|e| TradeError::Configuration(format!("{name}={value:?}: {e}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(TradeError::Configuration(format!(
            "{name}={value:?}: expected true or false"
        ))),
    }
}
