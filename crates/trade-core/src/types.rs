//! Canonical trade entities.
//!
//! Every provider payload is normalized into these provider-agnostic types:
//!
//! - [`TradeStats`] - Per-country trade snapshot
//! - [`MarketData`] - Per-(country, category) market snapshot
//! - [`ExportOpportunity`] - Scored candidate opportunity
//! - [`ProductStat`] - One product line's contribution to a trade total
//! - [`TradePartner`] - One partner's share of a country's trade
//! - [`CountryIndicators`] - Macro indicators for one country
//! - [`DashboardStats`] - Aggregate over a set of economies

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where the data in a response came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Answered by a provider call made for this request.
    Live,
    /// Served from the cache store.
    Cache,
    /// Synthetic dataset substituted for live data.
    Fallback,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Live => "live",
            Self::Cache => "cache",
            Self::Fallback => "fallback",
        };
        f.write_str(name)
    }
}

/// How crowded a market is with competing suppliers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompetitionLevel {
    /// Few active competing suppliers.
    Low,
    /// Moderate competition.
    Medium,
    /// Many active competing suppliers.
    High,
}

/// How a market's tariff rate was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TariffBasis {
    /// Reported directly by the provider.
    Reported,
    /// Derived from the CIF/FOB valuation spread.
    CifFobSpread,
    /// Seeded placeholder; not an authoritative figure.
    Placeholder,
}

/// Confidence in a derived entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reliability {
    /// Derived from category-level provider data.
    High,
    /// Derived from macro proxies.
    Medium,
    /// Contains estimated placeholder values.
    Estimated,
}

/// Whether an opportunity was derived from provider data or synthesized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityProvenance {
    /// Derived from live (or cached live) trade flows.
    Derived,
    /// Part of a synthetic fallback dataset.
    Synthesized,
}

/// A single product line's contribution to a trade total.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductStat {
    /// Product code (HS code or indicator id).
    pub code: String,
    /// Display name.
    pub name: String,
    /// Absolute value in USD.
    pub value: f64,
    /// Share of the total, in percent.
    pub percentage: f64,
    /// Period-over-period growth, in percent.
    pub growth_rate: f64,
}

/// One partner's share of a country's trade.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradePartner {
    /// Partner ISO3 code.
    pub country_code: String,
    /// Partner display name.
    pub country_name: String,
    /// Trade value with this partner in USD.
    pub value: f64,
    /// Share of the reporter's partner trade, in percent.
    pub percentage: f64,
}

/// Per-country trade snapshot.
///
/// The trade balance is not stored; [`TradeStats::trade_balance`] always
/// recomputes it from the totals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    /// Reporter ISO3 code.
    pub country_code: String,
    /// Reporter display name.
    pub country_name: String,
    /// Total exports in USD.
    pub total_exports: f64,
    /// Total imports in USD.
    pub total_imports: f64,
    /// Largest export product lines.
    pub top_exports: Vec<ProductStat>,
    /// Largest import product lines.
    pub top_imports: Vec<ProductStat>,
    /// Largest trading partners.
    pub top_partners: Vec<TradePartner>,
    /// Reporting period (e.g. `"2022"`).
    pub period: String,
    /// Provider tag.
    pub source: String,
    /// When the underlying payload was fetched.
    pub last_updated: DateTime<Utc>,
}

impl TradeStats {
    /// Exports minus imports.
    #[must_use]
    pub fn trade_balance(&self) -> f64 {
        self.total_exports - self.total_imports
    }
}

/// Per-(country, product-category) market snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    /// Market ISO3 code.
    pub country_code: String,
    /// Market display name.
    pub country_name: String,
    /// Product category (HS code or `TOTAL`).
    pub product_category: String,
    /// Import market size in USD.
    pub market_size: f64,
    /// Year-over-year growth in percent; may be negative.
    pub growth_rate: f64,
    /// Competition classification.
    pub competition_level: CompetitionLevel,
    /// Tariff rate in percent, always within `[0, 50]`.
    pub tariff_rate: f64,
    /// The unclamped figure the tariff was derived from, when there was one.
    pub reported_tariff_rate: Option<f64>,
    /// How [`MarketData::tariff_rate`] was obtained.
    pub tariff_basis: TariffBasis,
    /// Two-way trade volume in USD.
    pub trade_volume: f64,
    /// Reporting period.
    pub period: String,
    /// Provider tag.
    pub source: String,
    /// Confidence tag.
    pub reliability: Reliability,
    /// When the underlying payload was fetched.
    pub last_updated: DateTime<Utc>,
}

/// A scored candidate export opportunity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportOpportunity {
    /// Destination ISO3 code.
    pub country_code: String,
    /// Destination display name.
    pub country_name: String,
    /// Product category code.
    pub product_category: String,
    /// Product display name.
    pub product_name: String,
    /// Estimated value in USD.
    pub estimated_value: f64,
    /// Import growth in percent.
    pub growth_rate: f64,
    /// Heuristic score in `[0, 100]`.
    pub opportunity_score: u8,
    /// Compliance-style requirements for the destination.
    pub requirements: Vec<String>,
    /// Derived or synthesized.
    pub provenance: OpportunityProvenance,
    /// Reporting period.
    pub period: String,
}

/// Macro indicators for one country.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CountryIndicators {
    /// ISO3 code.
    pub country_code: String,
    /// Display name.
    pub country_name: String,
    /// Latest period with data.
    pub period: String,
    /// GDP in current USD.
    pub gdp: f64,
    /// Real GDP growth in percent.
    pub gdp_growth: f64,
    /// Exports of goods and services in USD.
    pub exports: f64,
    /// Imports of goods and services in USD.
    pub imports: f64,
    /// Weighted mean applied tariff, when reported.
    pub tariff_rate: Option<f64>,
    /// Provider tag.
    pub source: String,
    /// When the underlying payload was fetched.
    pub last_updated: DateTime<Utc>,
}

impl CountryIndicators {
    /// Exports minus imports.
    #[must_use]
    pub fn trade_balance(&self) -> f64 {
        self.exports - self.imports
    }

    /// Exports plus imports.
    #[must_use]
    pub fn trade_volume(&self) -> f64 {
        self.exports + self.imports
    }
}

/// Aggregate figures over a set of economies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    /// Number of economies contributing.
    pub country_count: usize,
    /// Sum of exports in USD.
    pub total_exports: f64,
    /// Sum of imports in USD.
    pub total_imports: f64,
    /// Sum of exports and imports in USD.
    pub total_trade_volume: f64,
    /// Mean real GDP growth in percent.
    pub average_gdp_growth: f64,
    /// Economies ranked by trade volume, largest first.
    pub top_economies: Vec<CountryIndicators>,
    /// Latest period across contributors.
    pub period: String,
    /// Oldest fetch time across contributors.
    pub last_updated: DateTime<Utc>,
}

impl DashboardStats {
    /// Builds the dashboard aggregate from per-country indicators.
    ///
    /// `top` bounds the number of economies kept in `top_economies`.
    #[must_use]
    pub fn from_indicators(indicators: &[CountryIndicators], top: usize) -> Self {
        let total_exports: f64 = indicators.iter().map(|i| i.exports).sum();
        let total_imports: f64 = indicators.iter().map(|i| i.imports).sum();
        let average_gdp_growth = if indicators.is_empty() {
            0.0
        } else {
            indicators.iter().map(|i| i.gdp_growth).sum::<f64>() / indicators.len() as f64
        };

        let mut ranked = indicators.to_vec();
        ranked.sort_by(|a, b| b.trade_volume().total_cmp(&a.trade_volume()));
        ranked.truncate(top);

        Self {
            country_count: indicators.len(),
            total_exports,
            total_imports,
            total_trade_volume: total_exports + total_imports,
            average_gdp_growth,
            top_economies: ranked,
            period: indicators
                .iter()
                .map(|i| i.period.clone())
                .max()
                .unwrap_or_default(),
            last_updated: indicators
                .iter()
                .map(|i| i.last_updated)
                .min()
                .unwrap_or_else(Utc::now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indicators(code: &str, exports: f64, imports: f64, growth: f64) -> CountryIndicators {
        CountryIndicators {
            country_code: code.to_string(),
            country_name: code.to_string(),
            period: "2022".to_string(),
            gdp: 1.0e12,
            gdp_growth: growth,
            exports,
            imports,
            tariff_rate: None,
            source: "test".to_string(),
            last_updated: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_trade_balance_is_derived() {
        let mut stats = TradeStats {
            country_code: "USA".into(),
            country_name: "United States".into(),
            total_exports: 100.0,
            total_imports: 150.0,
            top_exports: vec![],
            top_imports: vec![],
            top_partners: vec![],
            period: "2022".into(),
            source: "test".into(),
            last_updated: Utc::now(),
        };
        assert_eq!(stats.trade_balance(), -50.0);

        stats.total_exports = 400.0;
        assert_eq!(stats.trade_balance(), 250.0);
    }

    #[test]
    fn test_data_source_serialization() {
        assert_eq!(serde_json::to_string(&DataSource::Cache).unwrap(), "\"cache\"");
        assert_eq!(DataSource::Fallback.to_string(), "fallback");
    }

    #[test]
    fn test_dashboard_from_indicators() {
        let list = vec![
            indicators("USA", 3.0e12, 3.9e12, 2.0),
            indicators("DEU", 2.0e12, 1.8e12, 1.0),
            indicators("CHN", 3.7e12, 3.1e12, 3.0),
        ];
        let dashboard = DashboardStats::from_indicators(&list, 2);

        assert_eq!(dashboard.country_count, 3);
        assert_eq!(dashboard.total_exports, 8.7e12);
        assert_eq!(dashboard.total_imports, 8.8e12);
        assert_eq!(dashboard.average_gdp_growth, 2.0);
        assert_eq!(dashboard.top_economies.len(), 2);
        assert_eq!(dashboard.top_economies[0].country_code, "CHN");
        assert_eq!(dashboard.top_economies[1].country_code, "USA");
    }

    #[test]
    fn test_dashboard_from_nothing() {
        let dashboard = DashboardStats::from_indicators(&[], 5);
        assert_eq!(dashboard.country_count, 0);
        assert_eq!(dashboard.average_gdp_growth, 0.0);
        assert!(dashboard.top_economies.is_empty());
    }
}
