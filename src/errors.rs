//! Error taxonomy shared by the pollers, the change feed and the store layer

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HistoryError {
    /// Provider asked us to slow down; wait `retry_after` before calling again
    #[error("rate limited: retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    /// Timeouts, connection failures and 5xx responses
    #[error("transient error: {0}")]
    Transient(String),
    /// Access token rejected or could not be refreshed
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("config error: {0}")]
    Config(String),
}

pub type HistoryResult<T> = Result<T, HistoryError>;

impl From<reqwest::Error> for HistoryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            HistoryError::MalformedPayload(e.to_string())
        } else {
            HistoryError::Transient(e.to_string())
        }
    }
}

impl From<serde_json::Error> for HistoryError {
    fn from(e: serde_json::Error) -> Self {
        HistoryError::MalformedPayload(e.to_string())
    }
}

impl From<sqlx::Error> for HistoryError {
    fn from(e: sqlx::Error) -> Self {
        HistoryError::StoreUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_errors_are_malformed_payloads() {
        let err: HistoryError = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err().into();
        assert!(matches!(err, HistoryError::MalformedPayload(_)));
    }

    #[test]
    fn test_rate_limit_message() {
        let err = HistoryError::RateLimited {
            retry_after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "rate limited: retry after 30s");
    }

    #[test]
    fn test_sqlx_maps_to_store_unavailable() {
        let err: HistoryError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, HistoryError::StoreUnavailable(_)));
    }
}
