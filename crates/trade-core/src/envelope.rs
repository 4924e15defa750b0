//! Uniform response envelope returned by every aggregation query.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::error::TradeError;
use crate::types::DataSource;

/// Response envelope: data plus provenance.
///
/// Callers tell "live", "fallback" and "failed" apart through
/// [`ApiResponse::success`] and [`ApiResponse::source`] alone.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ApiResponse<T> {
    /// The payload; `None` only when `success` is false.
    pub data: Option<T>,
    /// Whether the query produced data.
    pub success: bool,
    /// When the envelope was built.
    pub timestamp: DateTime<Utc>,
    /// Which data source answered.
    pub source: DataSource,
    /// The typed error behind a failed envelope.
    #[serde(serialize_with = "serialize_error", skip_serializing_if = "Option::is_none")]
    pub error: Option<TradeError>,
    /// Validation warnings and omitted sub-requests.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl<T> ApiResponse<T> {
    /// A successful envelope.
    #[must_use]
    pub fn ok(data: T, source: DataSource) -> Self {
        Self {
            data: Some(data),
            success: true,
            timestamp: Utc::now(),
            source,
            error: None,
            warnings: Vec::new(),
        }
    }

    /// A successful envelope carrying synthetic data.
    #[must_use]
    pub fn fallback(data: T) -> Self {
        Self::ok(data, DataSource::Fallback)
    }

    /// A failed envelope.
    #[must_use]
    pub fn failed(error: TradeError) -> Self {
        Self {
            data: None,
            success: false,
            timestamp: Utc::now(),
            source: DataSource::Live,
            error: Some(error),
            warnings: Vec::new(),
        }
    }

    /// Attaches warnings.
    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// Converts into a `Result`, for callers who prefer `?`.
    pub fn into_result(self) -> Result<T, TradeError> {
        match (self.data, self.error) {
            (Some(data), _) => Ok(data),
            (None, Some(error)) => Err(error),
            (None, None) => Err(TradeError::InvalidResponse("empty envelope".to_string())),
        }
    }
}

fn serialize_error<S: Serializer>(
    error: &Option<TradeError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.serialize_str(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_envelope() {
        let response = ApiResponse::ok(vec![1, 2, 3], DataSource::Cache);
        assert!(response.success);
        assert_eq!(response.source, DataSource::Cache);
        assert_eq!(response.into_result().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_failed_envelope_serializes_error() {
        let response: ApiResponse<u32> =
            ApiResponse::failed(TradeError::NotFound("USA".to_string()));
        assert!(!response.success);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["source"], "live");
        assert_eq!(json["error"], "Not found: USA");
        assert!(json["data"].is_null());
        assert!(response.into_result().is_err());
    }

    #[test]
    fn test_fallback_envelope_with_warnings() {
        let response = ApiResponse::fallback("synthetic").with_warnings(vec!["w".into()]);
        assert!(response.success);
        assert_eq!(response.source, DataSource::Fallback);
        assert_eq!(response.warnings, vec!["w".to_string()]);
    }
}
