#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/trade/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

/// The transport client and status classification.
pub mod client;
/// Endpoint description, cache keys and per-request options.
pub mod endpoint;
/// Backoff strategies.
pub mod retry;
/// Per-provider usage counters.
pub mod stats;

mod single_flight;

pub use client::{Fetched, TransportClient, classify_status};
pub use endpoint::{Endpoint, RequestOptions};
pub use retry::Backoff;
pub use stats::{ProviderUsage, UsageStats};
