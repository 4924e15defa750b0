//! Query and filter value objects.
//!
//! Filters are pure predicates over validated entities; applying them never
//! mutates what they inspect.

use serde::{Deserialize, Serialize};

use crate::types::{CompetitionLevel, ExportOpportunity, MarketData};

/// Numeric floors/ceilings applied to market data after validation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketFilters {
    /// Drop markets smaller than this (USD).
    pub min_market_size: Option<f64>,
    /// Drop markets with a higher tariff rate (percent).
    pub max_tariff: Option<f64>,
    /// Drop markets growing slower than this (percent).
    pub min_growth: Option<f64>,
    /// Keep only these competition levels. Empty keeps all.
    pub competition_levels: Vec<CompetitionLevel>,
}

impl MarketFilters {
    /// Filters that keep everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum market size.
    #[must_use]
    pub const fn with_min_market_size(mut self, value: f64) -> Self {
        self.min_market_size = Some(value);
        self
    }

    /// Sets the maximum tariff rate.
    #[must_use]
    pub const fn with_max_tariff(mut self, value: f64) -> Self {
        self.max_tariff = Some(value);
        self
    }

    /// Sets the minimum growth rate.
    #[must_use]
    pub const fn with_min_growth(mut self, value: f64) -> Self {
        self.min_growth = Some(value);
        self
    }

    /// Restricts results to the given competition levels.
    #[must_use]
    pub fn with_competition_levels(mut self, levels: impl Into<Vec<CompetitionLevel>>) -> Self {
        self.competition_levels = levels.into();
        self
    }

    /// Returns true if `market` passes every configured filter.
    #[must_use]
    pub fn matches(&self, market: &MarketData) -> bool {
        self.min_market_size.is_none_or(|min| market.market_size >= min)
            && self.max_tariff.is_none_or(|max| market.tariff_rate <= max)
            && self.min_growth.is_none_or(|min| market.growth_rate >= min)
            && (self.competition_levels.is_empty()
                || self.competition_levels.contains(&market.competition_level))
    }

    /// Keeps matching markets, largest market first.
    #[must_use]
    pub fn apply(&self, markets: Vec<MarketData>) -> Vec<MarketData> {
        let mut kept: Vec<MarketData> = markets.into_iter().filter(|m| self.matches(m)).collect();
        kept.sort_by(|a, b| b.market_size.total_cmp(&a.market_size));
        kept
    }
}

/// A market data request: a country set and one product category.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketQuery {
    /// ISO3 codes to query. Empty means the default major economies.
    pub countries: Vec<String>,
    /// HS code, or `TOTAL` for all products.
    pub product_category: String,
    /// Post-filters.
    pub filters: MarketFilters,
}

impl MarketQuery {
    /// A query for `product_category` across the default economies.
    #[must_use]
    pub fn new(product_category: impl Into<String>) -> Self {
        Self {
            countries: Vec::new(),
            product_category: product_category.into(),
            filters: MarketFilters::default(),
        }
    }

    /// Sets the country set.
    #[must_use]
    pub fn with_countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.countries = countries.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the post-filters.
    #[must_use]
    pub fn with_filters(mut self, filters: MarketFilters) -> Self {
        self.filters = filters;
        self
    }
}

/// An export opportunity request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpportunityQuery {
    /// ISO3 code of the exporting country; never proposed as a destination.
    pub exporter: String,
    /// HS code, or `TOTAL` for all products.
    pub product_category: String,
    /// Candidate destinations. Empty means the default major economies.
    pub countries: Vec<String>,
    /// Drop opportunities scoring below this.
    pub min_score: Option<u8>,
}

impl OpportunityQuery {
    /// A query for `exporter` selling `product_category`.
    #[must_use]
    pub fn new(exporter: impl Into<String>, product_category: impl Into<String>) -> Self {
        Self {
            exporter: exporter.into(),
            product_category: product_category.into(),
            countries: Vec::new(),
            min_score: None,
        }
    }

    /// Sets the candidate destinations.
    #[must_use]
    pub fn with_countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.countries = countries.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the minimum score.
    #[must_use]
    pub const fn with_min_score(mut self, score: u8) -> Self {
        self.min_score = Some(score);
        self
    }

    /// Keeps opportunities at or above the minimum score, best first.
    #[must_use]
    pub fn apply(&self, opportunities: Vec<ExportOpportunity>) -> Vec<ExportOpportunity> {
        let mut kept: Vec<ExportOpportunity> = opportunities
            .into_iter()
            .filter(|o| self.min_score.is_none_or(|min| o.opportunity_score >= min))
            .collect();
        kept.sort_by(|a, b| {
            b.opportunity_score
                .cmp(&a.opportunity_score)
                .then_with(|| b.estimated_value.total_cmp(&a.estimated_value))
        });
        kept
    }
}
