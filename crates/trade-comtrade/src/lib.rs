#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/trade/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! UN Comtrade data provider.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use trade_cache::InMemoryCache;
//! use trade_comtrade::{ComtradeProvider, ComtradeRequest, ComtradeTransformer};
//! use trade_core::TradeTransformer;
//! use trade_http::{RequestOptions, TransportClient};
//!
//! # async fn example() -> trade_core::Result<()> {
//! let transport = TransportClient::new(Arc::new(InMemoryCache::default()))?;
//! let provider = ComtradeProvider::new(transport);
//!
//! let request = ComtradeRequest::new(842, [2021, 2022]).with_commodity("TOTAL,AG2");
//! let fetched = provider.fetch(&request, &RequestOptions::default()).await?;
//!
//! let stats = ComtradeTransformer::new(fetched.fetched_at)
//!     .to_trade_stats(&fetched.data, "USA", "United States");
//! println!("{} exports {}", stats.country_name, stats.total_exports);
//! # Ok(())
//! # }
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};
use trade_core::{DataProvider, DataSource, Result};
use trade_http::{Endpoint, Fetched, RequestOptions, TransportClient};

mod transform;

pub use transform::ComtradeTransformer;

/// Comtrade API base URL.
pub const COMTRADE_BASE_URL: &str = "https://comtradeapi.un.org";

/// Provider name and cache-key prefix.
pub const PROVIDER_NAME: &str = "comtrade";

/// Path of the keyed annual HS commodity endpoint.
const DATA_PATH: &str = "/data/v1/get/C/A/HS";

/// Path of the keyless preview endpoint.
const PREVIEW_PATH: &str = "/public/v1/preview/C/A/HS";

/// Maximum rows the keyless preview endpoint returns per call.
pub const PREVIEW_ROW_LIMIT: usize = 500;

/// Header carrying the subscription key.
const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Commodity code for all products.
pub const TOTAL: &str = "TOTAL";

/// Direction of a trade flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowCode {
    /// Exports (`X`).
    Export,
    /// Imports (`M`).
    Import,
}

impl FlowCode {
    /// The Comtrade code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Export => "X",
            Self::Import => "M",
        }
    }
}

/// Parameters of one Comtrade call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComtradeRequest {
    /// Reporter codes.
    pub reporters: Vec<u16>,
    /// Partner codes; empty means every partner including World.
    pub partners: Vec<u16>,
    /// Years.
    pub periods: Vec<i32>,
    /// Flow directions.
    pub flows: Vec<FlowCode>,
    /// Commodity code list, e.g. `TOTAL`, `85` or `TOTAL,AG2`.
    pub commodity: String,
}

impl ComtradeRequest {
    /// Total exports and imports of `reporter` against all partners.
    #[must_use]
    pub fn new(reporter: u16, periods: impl IntoIterator<Item = i32>) -> Self {
        Self {
            reporters: vec![reporter],
            partners: Vec::new(),
            periods: periods.into_iter().collect(),
            flows: vec![FlowCode::Export, FlowCode::Import],
            commodity: TOTAL.to_string(),
        }
    }

    /// Restricts the partners.
    #[must_use]
    pub fn with_partners(mut self, partners: impl IntoIterator<Item = u16>) -> Self {
        self.partners = partners.into_iter().collect();
        self
    }

    /// Restricts the flow directions.
    #[must_use]
    pub fn with_flows(mut self, flows: impl IntoIterator<Item = FlowCode>) -> Self {
        self.flows = flows.into_iter().collect();
        self
    }

    /// Sets the commodity code list.
    #[must_use]
    pub fn with_commodity(mut self, commodity: impl Into<String>) -> Self {
        self.commodity = commodity.into();
        self
    }
}

fn join<T: ToString>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

/// UN Comtrade provider.
#[derive(Clone)]
pub struct ComtradeProvider {
    transport: TransportClient,
    base_url: String,
    api_key: Option<String>,
}

impl fmt::Debug for ComtradeProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComtradeProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl ComtradeProvider {
    /// A keyless provider against the public endpoint.
    #[must_use]
    pub fn new(transport: TransportClient) -> Self {
        Self {
            transport,
            base_url: COMTRADE_BASE_URL.to_string(),
            api_key: None,
        }
    }

    /// Overrides the base URL (tests, proxies).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the subscription key. With a key the full data endpoint is used.
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    /// True when a keyless response of `rows` rows may have been cut at
    /// [`PREVIEW_ROW_LIMIT`].
    #[must_use]
    pub fn is_capped(&self, rows: usize) -> bool {
        self.api_key.is_none() && rows >= PREVIEW_ROW_LIMIT
    }

    /// Builds the endpoint for `request`.
    #[must_use]
    pub fn endpoint(&self, request: &ComtradeRequest) -> Endpoint {
        let path = if self.api_key.is_some() {
            DATA_PATH
        } else {
            PREVIEW_PATH
        };
        let flows: Vec<&str> = request.flows.iter().map(|f| f.code()).collect();

        let mut endpoint = Endpoint::new(PROVIDER_NAME, format!("{}{path}", self.base_url))
            .with_query("reporterCode", join(&request.reporters))
            .with_query("period", join(&request.periods))
            .with_query("flowCode", flows.join(","))
            .with_query("cmdCode", &request.commodity)
            .with_query("includeDesc", "true");
        if !request.partners.is_empty() {
            endpoint = endpoint.with_query("partnerCode", join(&request.partners));
        }
        if let Some(key) = &self.api_key {
            endpoint = endpoint.with_header(KEY_HEADER, key);
        }
        endpoint
    }

    /// Fetches the records for `request`.
    ///
    /// # Errors
    /// Propagates the transport error of the call.
    pub async fn fetch(
        &self,
        request: &ComtradeRequest,
        options: &RequestOptions,
    ) -> Result<Fetched<Vec<ComtradeRecord>>> {
        let endpoint = self.endpoint(request);
        let fetched = self
            .transport
            .request::<ComtradeResponse>(&endpoint, options)
            .await?;
        debug!(
            records = fetched.data.data.len(),
            cached = fetched.source == DataSource::Cache,
            "Comtrade response"
        );
        if self.is_capped(fetched.data.data.len()) {
            warn!(
                records = fetched.data.data.len(),
                commodity = %request.commodity,
                "Comtrade preview response reached its row limit"
            );
        }
        Ok(Fetched {
            data: fetched.data.data,
            source: fetched.source,
            fetched_at: fetched.fetched_at,
        })
    }
}

impl DataProvider for ComtradeProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn description(&self) -> &str {
        "UN Comtrade - bilateral merchandise trade flows by HS commodity"
    }
}

// ============================================================================
// Comtrade API response types
// ============================================================================

/// Response body of the data and preview endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComtradeResponse {
    /// Records; absent or null means none.
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: Vec<ComtradeRecord>,
}

/// One reporter/partner/flow/commodity/period row.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComtradeRecord {
    /// Reporter numeric code.
    #[serde(default, deserialize_with = "null_as_default")]
    pub reporter_code: u16,
    /// Reporter ISO3 code.
    #[serde(default, rename = "reporterISO", deserialize_with = "null_as_default")]
    pub reporter_iso: String,
    /// Reporter name.
    #[serde(default, deserialize_with = "null_as_default")]
    pub reporter_desc: String,
    /// Partner numeric code; 0 is World.
    #[serde(default, deserialize_with = "null_as_default")]
    pub partner_code: u16,
    /// Partner ISO3 code.
    #[serde(default, rename = "partnerISO", deserialize_with = "null_as_default")]
    pub partner_iso: String,
    /// Partner name.
    #[serde(default, deserialize_with = "null_as_default")]
    pub partner_desc: String,
    /// `X` or `M`; re-export flows are ignored by the transformer.
    #[serde(default, deserialize_with = "null_as_default")]
    pub flow_code: String,
    /// HS code or `TOTAL`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub cmd_code: String,
    /// Commodity description.
    #[serde(default, deserialize_with = "null_as_default")]
    pub cmd_desc: String,
    /// Year, delivered as either a string or a number.
    #[serde(default, deserialize_with = "period_string")]
    pub period: String,
    /// Trade value in USD.
    #[serde(default)]
    pub primary_value: Option<f64>,
    /// CIF valuation in USD.
    #[serde(default, rename = "cifvalue")]
    pub cif_value: Option<f64>,
    /// FOB valuation in USD.
    #[serde(default, rename = "fobvalue")]
    pub fob_value: Option<f64>,
    /// Net weight in kg.
    #[serde(default)]
    pub net_wgt: Option<f64>,
}

impl ComtradeRecord {
    /// Trade value, 0 when missing.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.primary_value.filter(|v| v.is_finite()).unwrap_or(0.0)
    }

    /// True for export rows.
    #[must_use]
    pub fn is_export(&self) -> bool {
        self.flow_code == FlowCode::Export.code()
    }

    /// True for import rows.
    #[must_use]
    pub fn is_import(&self) -> bool {
        self.flow_code == FlowCode::Import.code()
    }

    /// True for rows against the World aggregate partner.
    #[must_use]
    pub const fn is_world(&self) -> bool {
        self.partner_code == trade_core::country::WORLD_M49
    }

    /// True for the all-products line.
    #[must_use]
    pub fn is_total(&self) -> bool {
        self.cmd_code.eq_ignore_ascii_case(TOTAL)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn period_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use trade_cache::InMemoryCache;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn provider(server: &MockServer) -> ComtradeProvider {
        let transport = TransportClient::new(Arc::new(InMemoryCache::default())).unwrap();
        ComtradeProvider::new(transport).with_base_url(server.uri())
    }

    #[test]
    fn test_row_cap_applies_to_keyless_calls_only() {
        let transport = TransportClient::new(Arc::new(InMemoryCache::default())).unwrap();
        let keyless = ComtradeProvider::new(transport);
        assert!(!keyless.is_capped(PREVIEW_ROW_LIMIT - 1));
        assert!(keyless.is_capped(PREVIEW_ROW_LIMIT));

        let keyed = keyless.with_api_key(Some("secret".to_string()));
        assert!(!keyed.is_capped(PREVIEW_ROW_LIMIT));
    }

    #[test]
    fn test_record_parsing_tolerates_nulls_and_numeric_period() {
        let json = r#"{"data": [{
            "reporterCode": 842, "reporterISO": "USA", "reporterDesc": null,
            "partnerCode": 0, "partnerISO": "W00", "flowCode": "X",
            "cmdCode": "TOTAL", "period": 2022, "primaryValue": 2.06e12,
            "cifvalue": null, "fobvalue": 2.06e12, "netWgt": null
        }]}"#;
        let response: ComtradeResponse = serde_json::from_str(json).unwrap();
        let record = &response.data[0];
        assert_eq!(record.period, "2022");
        assert_eq!(record.reporter_desc, "");
        assert!(record.is_world());
        assert!(record.is_export());
        assert!(record.is_total());
        assert_eq!(record.cif_value, None);

        let empty: ComtradeResponse = serde_json::from_str(r#"{"data": null}"#).unwrap();
        assert!(empty.data.is_empty());
    }

    #[test]
    fn test_endpoint_selection_and_key_handling() {
        let transport = TransportClient::new(Arc::new(InMemoryCache::default())).unwrap();
        let request = ComtradeRequest::new(842, [2021, 2022]).with_partners([0]);

        let public = ComtradeProvider::new(transport.clone());
        let endpoint = public.endpoint(&request);
        assert!(endpoint.url.ends_with(PREVIEW_PATH));
        assert!(endpoint.headers.is_empty());
        assert!(endpoint
            .query
            .contains(&("period".to_string(), "2021,2022".to_string())));
        assert!(endpoint
            .query
            .contains(&("partnerCode".to_string(), "0".to_string())));

        let keyed = ComtradeProvider::new(transport).with_api_key(Some("secret".into()));
        let endpoint = keyed.endpoint(&request);
        assert!(endpoint.url.ends_with(DATA_PATH));
        assert_eq!(endpoint.headers[0].0, KEY_HEADER);
        assert!(!endpoint.cache_key().contains("secret"));
        assert!(!format!("{keyed:?}").contains("secret"));
    }

    #[test_log::test(tokio::test)]
    async fn test_fetch_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(PREVIEW_PATH))
            .and(query_param("reporterCode", "276"))
            .and(query_param("cmdCode", "85"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"data": [{"reporterCode": 276, "reporterISO": "DEU", "partnerCode": 0,
                    "flowCode": "M", "cmdCode": "85", "period": "2022", "primaryValue": 1.9e11}]}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider(&server);
        let request = ComtradeRequest::new(276, [2022])
            .with_partners([0])
            .with_commodity("85");

        let fetched = provider
            .fetch(&request, &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(fetched.source, DataSource::Live);
        assert_eq!(fetched.data.len(), 1);
        assert_eq!(fetched.data[0].value(), 1.9e11);

        // Second call is served from the cache.
        let again = provider
            .fetch(&request, &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(again.source, DataSource::Cache);
        assert_eq!(again.data, fetched.data);
    }

    #[test_log::test(tokio::test)]
    async fn test_keyed_fetch_sends_subscription_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DATA_PATH))
            .and(header(KEY_HEADER, "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data": []}"#))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider(&server).with_api_key(Some("secret".into()));
        let fetched = provider
            .fetch(&ComtradeRequest::new(842, [2022]), &RequestOptions::default())
            .await
            .unwrap();
        assert!(fetched.data.is_empty());
    }
}
