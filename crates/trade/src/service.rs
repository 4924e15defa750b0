//! Aggregation service: providers, validation, filters and fallback behind
//! one query surface.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};
use trade_cache::InMemoryCache;
use trade_comtrade::{ComtradeProvider, ComtradeRequest, ComtradeTransformer, FlowCode};
use trade_core::country::{self, Country, MAJOR_ECONOMIES, WORLD_M49};
use trade_core::{
    ApiResponse, CachePattern, CacheStats, CountryIndicators, DashboardStats, DataProvider,
    DataSource, ExportOpportunity, MarketData, MarketQuery, OpportunityQuery, ResponseCache,
    Result, TradeError, TradeStats, TradeTransformer, Validate, Validator,
};
use trade_http::{Fetched, ProviderUsage, RequestOptions, TransportClient};
use trade_worldbank::{WorldBankProvider, WorldBankTransformer, indicators};

use crate::config::TradeConfig;
use crate::fallback::{DASHBOARD_TOP, SyntheticData};

/// Commodity list of the trade-stats totals call: the total plus every HS
/// chapter, against World only so the keyless row limit is not reached.
const TRADE_STATS_COMMODITIES: &str = "TOTAL,AG2";

/// Years of World Bank history fetched per call. Indicators lag unevenly,
/// so the latest year with a value is picked from this window.
const INDICATOR_YEARS: i32 = 5;

/// The all-products category.
const TOTAL: &str = "TOTAL";

/// Validated data of a live query plus its provenance.
#[derive(Debug)]
struct Answer<T> {
    data: T,
    source: DataSource,
    warnings: Vec<String>,
}

/// Trade-statistics aggregator.
///
/// Every query returns an [`ApiResponse`]: live or cached provider data when
/// live mode is on and the providers answer, synthetic data when live mode
/// is off or the providers fail and fallback is enabled, and a failed
/// envelope otherwise. Invalid parameters always fail.
///
/// # Example
///
/// ```rust,ignore
/// use trade::{TradeAggregator, TradeConfig};
///
/// let aggregator = TradeAggregator::new(TradeConfig::default().with_live_data(true))?;
/// let usa = aggregator.trade_stats("USA").await;
/// assert!(usa.success);
/// ```
pub struct TradeAggregator {
    config: TradeConfig,
    transport: TransportClient,
    comtrade: ComtradeProvider,
    worldbank: WorldBankProvider,
    validator: Validator,
}

impl fmt::Debug for TradeAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TradeAggregator")
            .field("config", &self.config)
            .field("providers", &[self.comtrade.name(), self.worldbank.name()])
            .finish_non_exhaustive()
    }
}

impl TradeAggregator {
    /// An aggregator with the cache described by `config`: a
    /// [`SqliteCache`](trade_cache::SqliteCache) when `cache_path` is set,
    /// otherwise an [`InMemoryCache`].
    ///
    /// # Errors
    /// Returns [`TradeError::Configuration`] for invalid settings, and the
    /// cache error if the cache file cannot be opened.
    pub fn new(config: TradeConfig) -> Result<Self> {
        let cache = build_cache(&config)?;
        Self::with_cache(config, cache)
    }

    /// An aggregator sharing `cache`.
    ///
    /// # Errors
    /// Returns [`TradeError::Configuration`] for invalid settings or if the
    /// HTTP client cannot be built.
    pub fn with_cache(config: TradeConfig, cache: Arc<dyn ResponseCache>) -> Result<Self> {
        config.validate()?;
        let transport = TransportClient::new(cache)?;
        let comtrade = ComtradeProvider::new(transport.clone())
            .with_base_url(&config.comtrade_base_url)
            .with_api_key(config.comtrade_api_key.clone());
        let worldbank =
            WorldBankProvider::new(transport.clone()).with_base_url(&config.worldbank_base_url);
        let validator = Validator::new(config.stale_after);

        info!(
            live_data = config.live_data,
            fallback = config.fallback_on_error,
            reference_year = config.reference_year,
            "Trade aggregator ready"
        );
        Ok(Self {
            config,
            transport,
            comtrade,
            worldbank,
            validator,
        })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &TradeConfig {
        &self.config
    }

    /// Trade snapshot of one country.
    #[instrument(skip(self))]
    pub async fn trade_stats(&self, country: &str) -> ApiResponse<TradeStats> {
        let country = match resolve_country(country) {
            Ok(c) => c,
            Err(e) => return ApiResponse::failed(e),
        };
        self.respond(self.live_trade_stats(country), |synthetic| {
            synthetic.trade_stats(country)
        })
        .await
    }

    /// Market snapshots of one product category across a country set,
    /// filtered and sorted by market size, largest first.
    ///
    /// An empty country set means the major economies. Countries whose
    /// provider call fails are left out with a warning.
    #[instrument(
        skip(self, query),
        fields(category = %query.product_category, countries = query.countries.len())
    )]
    pub async fn market_data(&self, query: &MarketQuery) -> ApiResponse<Vec<MarketData>> {
        let (countries, category) = match resolve_countries(&query.countries)
            .and_then(|countries| Ok((countries, resolve_category(&query.product_category)?)))
        {
            Ok(resolved) => resolved,
            Err(e) => return ApiResponse::failed(e),
        };

        let live = async {
            let answer = self
                .fan_out(&countries, |c| self.live_market(c, &category))
                .await?;
            Ok::<_, TradeError>(Answer {
                data: query.filters.apply(answer.data),
                ..answer
            })
        };
        self.respond(live, |synthetic| {
            let markets = countries
                .iter()
                .map(|c| synthetic.market_data(c, &category))
                .collect();
            query.filters.apply(markets)
        })
        .await
    }

    /// Macro indicators of a country set. An empty set means the major
    /// economies.
    #[instrument(skip(self, countries), fields(countries = countries.len()))]
    pub async fn economic_indicators(
        &self,
        countries: &[String],
    ) -> ApiResponse<Vec<CountryIndicators>> {
        let countries = match resolve_countries(countries) {
            Ok(c) => c,
            Err(e) => return ApiResponse::failed(e),
        };
        self.respond(self.live_indicators(&countries), |synthetic| {
            countries
                .iter()
                .map(|c| synthetic.country_indicators(c))
                .collect()
        })
        .await
    }

    /// Aggregate over the major economies.
    #[instrument(skip(self))]
    pub async fn dashboard_stats(&self) -> ApiResponse<DashboardStats> {
        let countries = major_economies();
        let live = async {
            let answer = self.live_indicators(&countries).await?;
            Ok::<_, TradeError>(Answer {
                data: DashboardStats::from_indicators(&answer.data, DASHBOARD_TOP),
                source: answer.source,
                warnings: answer.warnings,
            })
        };
        self.respond(live, SyntheticData::dashboard_stats).await
    }

    /// Markets where `query.exporter` could sell `query.product_category`,
    /// best score first.
    ///
    /// An empty country set means the major economies. The exporter itself
    /// is never listed.
    #[instrument(
        skip(self, query),
        fields(exporter = %query.exporter, category = %query.product_category)
    )]
    pub async fn export_opportunities(
        &self,
        query: &OpportunityQuery,
    ) -> ApiResponse<Vec<ExportOpportunity>> {
        let resolved = resolve_country(&query.exporter).and_then(|exporter| {
            let category = resolve_category(&query.product_category)?;
            let countries = resolve_countries(&query.countries)?;
            if let Some(min) = query.min_score.filter(|min| *min > 100) {
                return Err(TradeError::InvalidParameter(format!(
                    "min_score {min} outside [0, 100]"
                )));
            }
            Ok((exporter, category, countries))
        });
        let (exporter, category, countries) = match resolved {
            Ok(resolved) => resolved,
            Err(e) => return ApiResponse::failed(e),
        };
        let destinations: Vec<&'static Country> = countries
            .into_iter()
            .filter(|c| c.iso3 != exporter.iso3)
            .collect();

        let live = async {
            let answer = self
                .fan_out(&destinations, |c| {
                    self.live_opportunities(c, exporter, &category)
                })
                .await?;
            Ok::<_, TradeError>(Answer {
                data: query.apply(answer.data),
                ..answer
            })
        };
        self.respond(live, |synthetic| {
            query.apply(synthetic.export_opportunities(exporter, &destinations, &category))
        })
        .await
    }

    /// Probes the World Bank with one uncached, unretried call.
    ///
    /// Runs whether or not live mode is on.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> bool {
        let year = self.config.reference_year;
        let result = self
            .worldbank
            .fetch(
                "USA",
                &[indicators::GDP],
                year - 1..=year,
                &RequestOptions::probe(),
            )
            .await;
        match result {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Health check failed");
                false
            }
        }
    }

    /// Cache counters and size.
    ///
    /// # Errors
    /// Returns the cache backend's error.
    pub async fn cache_stats(&self) -> Result<CacheStats> {
        self.transport.cache().stats().await
    }

    /// Per-provider request counters.
    #[must_use]
    pub fn usage(&self) -> BTreeMap<String, ProviderUsage> {
        self.transport.usage().snapshot()
    }

    /// Drops every cached response of `provider`.
    ///
    /// # Errors
    /// Returns [`TradeError::InvalidParameter`] for an unknown provider name
    /// and the cache backend's error otherwise.
    #[instrument(skip(self))]
    pub async fn invalidate_provider(&self, provider: &str) -> Result<usize> {
        let known = [self.comtrade.name(), self.worldbank.name()];
        if !known.contains(&provider) {
            return Err(TradeError::InvalidParameter(format!(
                "unknown provider {provider:?}, expected one of {known:?}"
            )));
        }
        let removed = self
            .transport
            .cache()
            .invalidate(&CachePattern::provider(provider))
            .await?;
        info!(removed, "Invalidated provider cache");
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Fallback policy

    async fn respond<T>(
        &self,
        live: impl Future<Output = Result<Answer<T>>>,
        synthetic: impl FnOnce(&SyntheticData) -> T,
    ) -> ApiResponse<T> {
        if !self.config.live_data {
            if self.config.fallback_on_error {
                debug!("Live data disabled, serving synthetic data");
                return ApiResponse::fallback(synthetic(&self.synthetic()));
            }
            return ApiResponse::failed(TradeError::Configuration(
                "live data is disabled and fallback is off".to_string(),
            ));
        }

        match live.await {
            Ok(answer) => {
                ApiResponse::ok(answer.data, answer.source).with_warnings(answer.warnings)
            }
            Err(e @ TradeError::InvalidParameter(_)) => ApiResponse::failed(e),
            Err(e) if self.config.fallback_on_error => {
                warn!(error = %e, kind = e.kind(), "Live query failed, serving synthetic data");
                ApiResponse::fallback(synthetic(&self.synthetic()))
                    .with_warnings(vec![format!("live data unavailable: {e}")])
            }
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "Live query failed");
                ApiResponse::failed(e)
            }
        }
    }

    fn synthetic(&self) -> SyntheticData {
        SyntheticData::new(self.config.reference_year)
    }

    // ------------------------------------------------------------------------
    // Live queries

    fn options(&self) -> RequestOptions {
        self.config.request_options()
    }

    fn comtrade_periods(&self) -> [i32; 2] {
        let year = self.config.reference_year;
        [year - 1, year]
    }

    fn indicator_years(&self) -> RangeInclusive<i32> {
        let year = self.config.reference_year;
        year - (INDICATOR_YEARS - 1)..=year
    }

    /// Totals and product lines come from World rows over two years. Partner
    /// shares come from a second all-partner call for the reference year, so
    /// neither call outgrows the keyless row limit. A failed partner call
    /// leaves the partner list empty with a warning.
    async fn live_trade_stats(&self, country: &'static Country) -> Result<Answer<TradeStats>> {
        let options = self.options();
        let totals_request = ComtradeRequest::new(country.m49, self.comtrade_periods())
            .with_partners([WORLD_M49])
            .with_commodity(TRADE_STATS_COMMODITIES);
        let partners_request = ComtradeRequest::new(country.m49, [self.config.reference_year]);

        let (totals, partners) = futures::join!(
            self.comtrade.fetch(&totals_request, &options),
            self.comtrade.fetch(&partners_request, &options),
        );
        let totals = totals?;
        if totals.data.is_empty() {
            return Err(TradeError::NotFound(format!(
                "no trade data for {} in {}",
                country.iso3, self.config.reference_year
            )));
        }

        let mut warnings = Vec::new();
        let mut source = totals.source;
        let mut records = totals.data;
        if self.comtrade.is_capped(records.len()) {
            warnings.push(format!("{} totals may be incomplete: row limit reached", country.iso3));
        }
        match partners {
            Ok(partners) => {
                if self.comtrade.is_capped(partners.data.len()) {
                    warnings.push(format!(
                        "{} partners may be incomplete: row limit reached",
                        country.iso3
                    ));
                }
                if partners.source != DataSource::Cache {
                    source = DataSource::Live;
                }
                records.extend(partners.data.into_iter().filter(|r| !r.is_world()));
            }
            Err(e) => {
                warn!(country = country.iso3, error = %e, "Partner breakdown unavailable");
                warnings.push(format!("{} partners unavailable: {e}", country.iso3));
            }
        }

        let stats = ComtradeTransformer::new(totals.fetched_at).to_trade_stats(
            &records,
            country.iso3,
            country.name,
        );
        let stats = screen(&self.validator, vec![stats], &mut warnings)
            .pop()
            .ok_or_else(|| {
                TradeError::InvalidResponse(format!(
                    "trade stats for {} failed validation",
                    country.iso3
                ))
            })?;

        Ok(Answer {
            data: stats,
            source,
            warnings,
        })
    }

    async fn live_market(
        &self,
        country: &'static Country,
        category: &str,
    ) -> Result<Fetched<Vec<MarketData>>> {
        let (markets, source, fetched_at) = if category == TOTAL {
            let fetched = self
                .worldbank
                .fetch_indicators(country.iso3, self.indicator_years(), &self.options())
                .await?;
            let markets =
                WorldBankTransformer::new(fetched.fetched_at).to_market_data(&fetched.data, TOTAL);
            (markets, fetched.source, fetched.fetched_at)
        } else {
            let request = ComtradeRequest::new(country.m49, self.comtrade_periods())
                .with_partners([WORLD_M49])
                .with_commodity(category);
            let fetched = self.comtrade.fetch(&request, &self.options()).await?;
            let markets = ComtradeTransformer::new(fetched.fetched_at)
                .to_market_data(&fetched.data, category);
            (markets, fetched.source, fetched.fetched_at)
        };

        if markets.is_empty() {
            return Err(TradeError::NotFound(format!(
                "no {category} market data for {}",
                country.iso3
            )));
        }
        Ok(Fetched {
            data: markets,
            source,
            fetched_at,
        })
    }

    async fn live_indicators(
        &self,
        countries: &[&'static Country],
    ) -> Result<Answer<Vec<CountryIndicators>>> {
        self.fan_out(countries, |c| async move {
            let fetched = self
                .worldbank
                .fetch_indicators(c.iso3, self.indicator_years(), &self.options())
                .await?;
            let indicators = WorldBankTransformer::new(fetched.fetched_at)
                .to_indicators(&fetched.data, c.iso3, c.name)
                .ok_or_else(|| TradeError::NotFound(format!("no indicators for {}", c.iso3)))?;
            Ok::<_, TradeError>(Fetched {
                data: vec![indicators],
                source: fetched.source,
                fetched_at: fetched.fetched_at,
            })
        })
        .await
    }

    async fn live_opportunities(
        &self,
        country: &'static Country,
        exporter: &'static Country,
        category: &str,
    ) -> Result<Fetched<Vec<ExportOpportunity>>> {
        if category == TOTAL {
            let fetched = self
                .worldbank
                .fetch_indicators(country.iso3, self.indicator_years(), &self.options())
                .await?;
            let opportunities = WorldBankTransformer::new(fetched.fetched_at)
                .to_export_opportunities(&fetched.data, exporter.iso3);
            return Ok(Fetched {
                data: opportunities,
                source: fetched.source,
                fetched_at: fetched.fetched_at,
            });
        }

        let request = ComtradeRequest::new(country.m49, self.comtrade_periods())
            .with_partners([WORLD_M49])
            .with_flows([FlowCode::Import])
            .with_commodity(category);
        let fetched = self.comtrade.fetch(&request, &self.options()).await?;
        let opportunities = ComtradeTransformer::new(fetched.fetched_at)
            .to_export_opportunities(&fetched.data, exporter.iso3);
        Ok(Fetched {
            data: opportunities,
            source: fetched.source,
            fetched_at: fetched.fetched_at,
        })
    }

    /// Runs `fetch` for every country, at most `max_concurrency` at a time,
    /// and merges the validated results in country order.
    ///
    /// Failed countries are omitted with a warning. Fails with the last
    /// error only when every country failed.
    async fn fan_out<T, F, Fut>(
        &self,
        countries: &[&'static Country],
        fetch: F,
    ) -> Result<Answer<Vec<T>>>
    where
        T: Validate,
        F: Fn(&'static Country) -> Fut,
        Fut: Future<Output = Result<Fetched<Vec<T>>>>,
    {
        let results: Vec<(&'static Country, Result<Fetched<Vec<T>>>)> =
            stream::iter(countries.iter().copied())
                .map(|c| {
                    let pending = fetch(c);
                    async move { (c, pending.await) }
                })
                .buffered(self.config.max_concurrency)
                .collect()
                .await;

        let mut data = Vec::new();
        let mut warnings = Vec::new();
        let mut last_error = None;
        let mut succeeded = 0_usize;
        let mut all_cached = true;

        for (country, result) in results {
            match result {
                Ok(fetched) => {
                    succeeded += 1;
                    all_cached &= fetched.source == DataSource::Cache;
                    data.extend(screen(&self.validator, fetched.data, &mut warnings));
                }
                Err(e) => {
                    warn!(
                        country = country.iso3,
                        error = %e,
                        "Sub-request failed, omitting country"
                    );
                    warnings.push(format!("{} omitted: {e}", country.iso3));
                    last_error = Some(e);
                }
            }
        }

        if succeeded == 0 {
            if let Some(e) = last_error {
                return Err(e);
            }
        }
        let source = if succeeded > 0 && all_cached {
            DataSource::Cache
        } else {
            DataSource::Live
        };
        debug!(succeeded, failed = countries.len() - succeeded, %source, "Fan-out complete");
        Ok(Answer {
            data,
            source,
            warnings,
        })
    }
}

/// Drops entities with hard validation errors and collects warnings.
fn screen<E: Validate>(
    validator: &Validator,
    entities: Vec<E>,
    warnings: &mut Vec<String>,
) -> Vec<E> {
    entities
        .into_iter()
        .filter(|entity| {
            let report = validator.validate(entity);
            for warning in &report.warnings {
                warn!(warning = %warning, "Validation warning");
            }
            warnings.extend(report.warnings);
            if !report.is_valid {
                warn!(errors = ?report.errors, "Dropping entity that failed validation");
            }
            report.is_valid
        })
        .collect()
}

fn build_cache(config: &TradeConfig) -> Result<Arc<dyn ResponseCache>> {
    match &config.cache_path {
        None => Ok(Arc::new(InMemoryCache::new(config.max_cache_bytes))),
        #[cfg(feature = "cache-sqlite")]
        Some(path) => Ok(Arc::new(
            trade_cache::SqliteCache::new(path)?.with_max_bytes(config.max_cache_bytes),
        )),
        #[cfg(not(feature = "cache-sqlite"))]
        Some(path) => Err(TradeError::Configuration(format!(
            "cache path {} needs the cache-sqlite feature",
            path.display()
        ))),
    }
}

fn major_economies() -> Vec<&'static Country> {
    MAJOR_ECONOMIES
        .iter()
        .filter_map(|code| country::by_iso3(code))
        .collect()
}

fn resolve_country(code: &str) -> Result<&'static Country> {
    country::by_iso3(code)
        .ok_or_else(|| TradeError::InvalidParameter(format!("unknown country code {code:?}")))
}

fn resolve_countries(codes: &[String]) -> Result<Vec<&'static Country>> {
    if codes.is_empty() {
        return Ok(major_economies());
    }
    let mut countries: Vec<&'static Country> = Vec::with_capacity(codes.len());
    for code in codes {
        let country = resolve_country(code)?;
        if !countries.iter().any(|c| c.iso3 == country.iso3) {
            countries.push(country);
        }
    }
    Ok(countries)
}

/// `TOTAL` or an HS code of 2, 4 or 6 digits.
fn resolve_category(category: &str) -> Result<String> {
    let category = category.trim();
    if category.eq_ignore_ascii_case(TOTAL) {
        return Ok(TOTAL.to_string());
    }
    let is_hs_code =
        matches!(category.len(), 2 | 4 | 6) && category.bytes().all(|b| b.is_ascii_digit());
    if is_hs_code {
        Ok(category.to_string())
    } else {
        Err(TradeError::InvalidParameter(format!(
            "product category {category:?} is neither TOTAL nor an HS code"
        )))
    }
}
