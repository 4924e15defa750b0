#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/trade/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Trade-statistics aggregation.
//!
//! This crate re-exports the core types, the cache backends and both
//! providers, and adds [`TradeAggregator`], which turns provider payloads
//! into validated, filtered entities behind one query surface, with
//! synthetic fallback data when live data is off or unavailable.
//!
//! # Features
//!
//! - `cache-sqlite` - SQLite-based persistent caching
//!
//! # Example
//!
//! ```rust,ignore
//! use trade::{OpportunityQuery, TradeAggregator, TradeConfig};
//!
//! #[tokio::main]
//! async fn main() -> trade::Result<()> {
//!     let aggregator = TradeAggregator::new(TradeConfig::from_env()?)?;
//!
//!     let response = aggregator
//!         .export_opportunities(&OpportunityQuery::new("DEU", "85").with_min_score(70))
//!         .await;
//!     for opportunity in response.into_result()? {
//!         println!("{} {}", opportunity.country_name, opportunity.opportunity_score);
//!     }
//!
//!     Ok(())
//! }
//! ```

// Core types and traits
pub use trade_core::*;

// Cache implementations
#[cfg(feature = "cache-sqlite")]
pub use trade_cache::SqliteCache;
pub use trade_cache::{InMemoryCache, NoopCache};

// Transport
pub use trade_http::{Endpoint, ProviderUsage, RequestOptions, TransportClient};

// Providers
pub use trade_comtrade::ComtradeProvider;
pub use trade_worldbank::WorldBankProvider;

mod config;
pub use config::TradeConfig;

/// Synthetic datasets.
pub mod fallback;

mod service;
pub use service::TradeAggregator;
