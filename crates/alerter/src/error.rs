//! Error types for the Nomad and Consul HTTP clients.

use thiserror::Error;

/// Errors returned by the upstream API clients.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (connect, timeout, body read)
    #[error("HTTP request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Upstream answered with a non-success status
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// Response body did not match the expected shape
    #[error("Failed to decode response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    /// Configured address is not a usable base URL
    #[error("Invalid API address: {0}")]
    InvalidUrl(String),

    /// Client construction failed
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
