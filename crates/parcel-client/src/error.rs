//! Query client error types.

use crate::config::ConfigError;

/// Errors from a rectangle query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Connection, TLS, proxy, or timeout failure.
    #[error("transport error calling {endpoint}: {source}")]
    Transport {
        endpoint: String,
        source: reqwest::Error,
    },
    /// The service answered with a non-2xx status.
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    /// The response body is not the expected JSON object.
    #[error("failed to decode response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
    /// The service reported an application-level error.
    #[error("{endpoint} reported an error: {message}")]
    Service { endpoint: String, message: String },
    /// The connection pool was shut down.
    #[error("connection pool closed")]
    PoolClosed,
    /// Client could not be configured.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl QueryError {
    /// Transport-class failures are worth another attempt; everything
    /// else would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueryError::Transport { .. } | QueryError::Status { .. })
    }
}
