//! Error types for trade data operations.
//!
//! This module defines [`TradeError`] which covers every failure that can occur
//! while fetching, caching, or normalizing provider data. Each variant knows
//! whether it is worth retrying; the transport retry loop consults
//! [`TradeError::is_retryable`] and nothing else.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during trade data operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TradeError {
    /// Network-related errors (connection failures, resets, timeouts).
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limit exceeded by a provider.
    #[error("Rate limited by {provider}: retry after {retry_after:?}")]
    RateLimited {
        /// The provider that rate limited the request.
        provider: String,
        /// Suggested time to wait before retrying.
        retry_after: Option<Duration>,
    },

    /// The provider rejected our credentials (401/403).
    #[error("Unauthorized by {provider} (HTTP {status})")]
    Unauthorized {
        /// The provider that rejected the request.
        provider: String,
        /// The HTTP status returned.
        status: u16,
    },

    /// The requested resource does not exist at the provider.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The provider answered with a body we could not understand.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A feature is disabled or misconfigured.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The provider failed on its side, or answered with an unclassified status.
    #[error("Server error from {provider} (HTTP {status}): {message}")]
    ServerError {
        /// The provider that failed.
        provider: String,
        /// The HTTP status returned.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// An invalid parameter was provided by the caller.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error interacting with the cache backend.
    #[error("Cache error: {0}")]
    Cache(String),
}

impl TradeError {
    /// Returns true when the transport should try the request again.
    ///
    /// Timeouts, connection failures, rate limits and 5xx responses are
    /// transient. Everything else fails immediately.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited { .. } => true,
            Self::ServerError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Provider-supplied delay to honour before the next attempt, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Short, stable name of the error kind, used in logs and envelopes.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unauthorized { .. } => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Configuration(_) => "configuration",
            Self::ServerError { .. } => "server_error",
            Self::InvalidParameter(_) => "invalid_parameter",
            Self::Cache(_) => "cache",
        }
    }
}

/// Result type alias using [`TradeError`].
pub type Result<T> = std::result::Result<T, TradeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TradeError::Network("reset".into()).is_retryable());
        assert!(
            TradeError::RateLimited {
                provider: "comtrade".into(),
                retry_after: None,
            }
            .is_retryable()
        );
        assert!(
            TradeError::ServerError {
                provider: "comtrade".into(),
                status: 503,
                message: "unavailable".into(),
            }
            .is_retryable()
        );
        assert!(
            !TradeError::ServerError {
                provider: "comtrade".into(),
                status: 400,
                message: "bad request".into(),
            }
            .is_retryable()
        );
        assert!(
            !TradeError::Unauthorized {
                provider: "comtrade".into(),
                status: 401,
            }
            .is_retryable()
        );
        assert!(!TradeError::NotFound("x".into()).is_retryable());
        assert!(!TradeError::InvalidResponse("x".into()).is_retryable());
        assert!(!TradeError::Configuration("x".into()).is_retryable());
    }

    #[test]
    fn test_retry_after_hint() {
        let err = TradeError::RateLimited {
            provider: "worldbank".into(),
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
        assert_eq!(err.kind(), "rate_limited");
        assert_eq!(TradeError::Network("x".into()).retry_after(), None);
    }
}
