//! Provider and transformer traits.
//!
//! This module defines the two seams every provider crate implements:
//!
//! - [`DataProvider`] - Base trait describing a provider
//! - [`TradeTransformer`] - Pure conversion of typed raw records into
//!   canonical entities

use std::fmt::Debug;

use crate::types::{ExportOpportunity, MarketData, ProductStat, TradeStats};

/// Base trait for all data providers.
pub trait DataProvider: Send + Sync + Debug {
    /// Returns the name of this provider, also used as its cache-key prefix.
    fn name(&self) -> &str;

    /// Returns a description of this provider.
    fn description(&self) -> &str;
}

/// Converts one provider's raw payload shape into canonical entities.
///
/// Implementations are pure: the same records always produce the same
/// entities, and missing optional fields are replaced with documented
/// defaults instead of failing.
pub trait TradeTransformer: Debug {
    /// The strongly-typed raw record this transformer consumes.
    type Record;

    /// Builds a per-country trade snapshot.
    fn to_trade_stats(
        &self,
        records: &[Self::Record],
        country_code: &str,
        country_name: &str,
    ) -> TradeStats;

    /// Builds one market snapshot per country present in `records`.
    fn to_market_data(&self, records: &[Self::Record], product_category: &str) -> Vec<MarketData>;

    /// Derives opportunities above the materiality threshold, never
    /// proposing `excluded_country` as a destination.
    fn to_export_opportunities(
        &self,
        records: &[Self::Record],
        excluded_country: &str,
    ) -> Vec<ExportOpportunity>;

    /// The top `limit` product lines by value, descending.
    fn to_product_stats(&self, records: &[Self::Record], limit: usize) -> Vec<ProductStat>;
}
