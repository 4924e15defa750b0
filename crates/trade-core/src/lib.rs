#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/trade/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core traits and types for trade-statistics data aggregation.
//!
//! This crate provides the foundational abstractions shared by every provider:
//!
//! - [`DataProvider`](provider::DataProvider) - Base trait for all providers
//! - [`TradeTransformer`](provider::TradeTransformer) - Raw records to canonical entities
//! - [`ResponseCache`](cache::ResponseCache) - Caching abstraction
//! - [`Validator`](validation::Validator) - Entity range and structure checks
//! - [`ApiResponse`](envelope::ApiResponse) - Uniform response envelope

/// Derived metrics: growth, competition, scores, tariffs.
pub mod analytics;
/// Cache trait, entries and eviction planning.
pub mod cache;
/// Country reference table.
pub mod country;
/// Response envelope.
pub mod envelope;
/// Error types for trade data operations.
pub mod error;
/// Provider and transformer traits.
pub mod provider;
/// Query and filter value objects.
pub mod query;
/// Canonical entities.
pub mod types;
/// Entity validation.
pub mod validation;

// Re-export commonly used items at crate root
pub use cache::{CacheEntry, CachePattern, CacheStats, ResponseCache};
pub use country::{Country, MAJOR_ECONOMIES};
pub use envelope::ApiResponse;
pub use error::{Result, TradeError};
pub use provider::{DataProvider, TradeTransformer};
pub use query::{MarketFilters, MarketQuery, OpportunityQuery};
pub use types::{
    CompetitionLevel, CountryIndicators, DashboardStats, DataSource, ExportOpportunity,
    MarketData, OpportunityProvenance, ProductStat, Reliability, TariffBasis, TradePartner,
    TradeStats,
};
pub use validation::{Validate, ValidationReport, Validator};
