#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/trade/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! World Bank indicators provider.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use trade_cache::InMemoryCache;
//! use trade_http::{RequestOptions, TransportClient};
//! use trade_worldbank::{WorldBankProvider, WorldBankTransformer};
//!
//! # async fn example() -> trade_core::Result<()> {
//! let transport = TransportClient::new(Arc::new(InMemoryCache::default()))?;
//! let provider = WorldBankProvider::new(transport);
//!
//! let fetched = provider
//!     .fetch_indicators("DEU", 2018..=2023, &RequestOptions::default())
//!     .await?;
//! if let Some(indicators) = WorldBankTransformer::new(fetched.fetched_at)
//!     .to_indicators(&fetched.data, "DEU", "Germany")
//! {
//!     println!("GDP {} in {}", indicators.gdp, indicators.period);
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt::Write as _;
use std::ops::RangeInclusive;

use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};
use trade_core::{CachePattern, DataProvider, DataSource, Result, TradeError};
use trade_http::{Endpoint, Fetched, RequestOptions, TransportClient};

mod transform;

pub use transform::WorldBankTransformer;

/// World Bank API base URL.
pub const WORLDBANK_BASE_URL: &str = "https://api.worldbank.org";

/// Provider name and cache-key prefix.
pub const PROVIDER_NAME: &str = "worldbank";

/// World Development Indicators.
const SOURCE_WDI: &str = "2";

/// Page size large enough for every indicator over a decade.
const PER_PAGE: &str = "1000";

/// Indicator codes used by the service.
pub mod indicators {
    /// GDP (current US$).
    pub const GDP: &str = "NY.GDP.MKTP.CD";
    /// GDP growth (annual %).
    pub const GDP_GROWTH: &str = "NY.GDP.MKTP.KD.ZG";
    /// Exports of goods and services (current US$).
    pub const EXPORTS: &str = "NE.EXP.GNFS.CD";
    /// Imports of goods and services (current US$).
    pub const IMPORTS: &str = "NE.IMP.GNFS.CD";
    /// Tariff rate, applied, weighted mean, all products (%).
    pub const TARIFF: &str = "TM.TAX.MRCH.WM.AR.ZS";
    /// Merchandise exports (current US$).
    pub const MERCHANDISE_EXPORTS: &str = "TX.VAL.MRCH.CD.WT";
    /// Service exports (BoP, current US$).
    pub const SERVICE_EXPORTS: &str = "BX.GSR.NFSV.CD";

    /// Every indicator above, in request order.
    pub const ALL: &[&str] = &[
        GDP,
        GDP_GROWTH,
        EXPORTS,
        IMPORTS,
        TARIFF,
        MERCHANDISE_EXPORTS,
        SERVICE_EXPORTS,
    ];
}

/// World Bank indicators provider.
#[derive(Debug, Clone)]
pub struct WorldBankProvider {
    transport: TransportClient,
    base_url: String,
}

impl WorldBankProvider {
    /// A provider against the public API.
    #[must_use]
    pub fn new(transport: TransportClient) -> Self {
        Self {
            transport,
            base_url: WORLDBANK_BASE_URL.to_string(),
        }
    }

    /// Overrides the base URL (tests, proxies).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Builds the endpoint for `indicators` of `iso3` over `years`.
    #[must_use]
    pub fn endpoint(
        &self,
        iso3: &str,
        indicators: &[&str],
        years: &RangeInclusive<i32>,
    ) -> Endpoint {
        let url = format!(
            "{}/v2/country/{}/indicator/{}",
            self.base_url,
            iso3.to_uppercase(),
            indicators.join(";")
        );
        Endpoint::new(PROVIDER_NAME, url)
            .with_query("format", "json")
            .with_query("source", SOURCE_WDI)
            .with_query("date", format!("{}:{}", years.start(), years.end()))
            .with_query("per_page", PER_PAGE)
    }

    /// Fetches every indicator in [`indicators::ALL`].
    ///
    /// # Errors
    /// See [`WorldBankProvider::fetch`].
    pub async fn fetch_indicators(
        &self,
        iso3: &str,
        years: RangeInclusive<i32>,
        options: &RequestOptions,
    ) -> Result<Fetched<Vec<WbObservation>>> {
        self.fetch(iso3, indicators::ALL, years, options).await
    }

    /// Fetches `indicators` of `iso3` over `years`.
    ///
    /// # Errors
    /// Propagates transport errors. A World Bank error message (for example
    /// an unknown country) becomes [`TradeError::NotFound`] and is evicted
    /// from the cache.
    pub async fn fetch(
        &self,
        iso3: &str,
        indicators: &[&str],
        years: RangeInclusive<i32>,
        options: &RequestOptions,
    ) -> Result<Fetched<Vec<WbObservation>>> {
        let endpoint = self.endpoint(iso3, indicators, &years);
        let fetched = self
            .transport
            .request::<WbResponse>(&endpoint, options)
            .await?;

        match fetched.data {
            WbResponse::Page(page, observations) => {
                let observations = observations.unwrap_or_default();
                debug!(
                    country = iso3,
                    total = page.total,
                    observations = observations.len(),
                    cached = fetched.source == DataSource::Cache,
                    "World Bank response"
                );
                Ok(Fetched {
                    data: observations,
                    source: fetched.source,
                    fetched_at: fetched.fetched_at,
                })
            }
            WbResponse::Error(bodies) => {
                let key = endpoint.cache_key();
                if let Err(e) = self
                    .transport
                    .cache()
                    .invalidate(&CachePattern::Key(key))
                    .await
                {
                    warn!(error = %e, "Failed to evict World Bank error body");
                }
                Err(TradeError::NotFound(format!(
                    "{PROVIDER_NAME}: {iso3}: {}",
                    error_text(&bodies)
                )))
            }
        }
    }
}

impl DataProvider for WorldBankProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn description(&self) -> &str {
        "World Bank - World Development Indicators (GDP, trade, tariffs)"
    }
}

fn error_text(bodies: &[WbErrorBody]) -> String {
    let mut text = String::new();
    for message in bodies.iter().flat_map(|b| &b.message) {
        if !text.is_empty() {
            text.push_str("; ");
        }
        let _ = write!(text, "{} ({})", message.value, message.key);
    }
    text
}

// ============================================================================
// World Bank API response types
// ============================================================================

/// Response body: `[page-meta, observations | null]`, or `[{"message": [..]}]`
/// for request errors.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WbResponse {
    /// A page of observations.
    Page(WbPage, Option<Vec<WbObservation>>),
    /// A request error.
    Error(Vec<WbErrorBody>),
}

/// Pagination metadata.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WbPage {
    /// Current page.
    #[serde(default)]
    pub page: u32,
    /// Page count.
    #[serde(default)]
    pub pages: u32,
    /// Total observations.
    #[serde(default)]
    pub total: u32,
}

/// An error body.
#[derive(Debug, Clone, Deserialize)]
pub struct WbErrorBody {
    /// Error messages.
    pub message: Vec<WbMessage>,
}

/// One error message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WbMessage {
    /// Error id.
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    /// Short error name.
    #[serde(default, deserialize_with = "null_as_default")]
    pub key: String,
    /// Error description.
    #[serde(default, deserialize_with = "null_as_default")]
    pub value: String,
}

/// An `{id, value}` reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WbRef {
    /// Code.
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    /// Display name.
    #[serde(default, deserialize_with = "null_as_default")]
    pub value: String,
}

/// One indicator value for one country and year.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WbObservation {
    /// Indicator reference.
    #[serde(default, deserialize_with = "null_as_default")]
    pub indicator: WbRef,
    /// Country reference.
    #[serde(default, deserialize_with = "null_as_default")]
    pub country: WbRef,
    /// ISO3 code.
    #[serde(default, rename = "countryiso3code", deserialize_with = "null_as_default")]
    pub country_iso3: String,
    /// Year.
    #[serde(default, deserialize_with = "null_as_default")]
    pub date: String,
    /// Value; null when not yet reported.
    #[serde(default)]
    pub value: Option<f64>,
}

impl WbObservation {
    /// ISO3 code, falling back to the country reference id.
    #[must_use]
    pub fn iso3(&self) -> &str {
        if self.country_iso3.is_empty() {
            &self.country.id
        } else {
            &self.country_iso3
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
