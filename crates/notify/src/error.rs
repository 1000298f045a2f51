//! Error types for incident delivery.

use thiserror::Error;

/// Errors that can occur when delivering an alert event.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Channel is not configured
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    /// The incident service answered but refused the event
    #[error("Event rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Rate limited by the service
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Other error
    #[error("{0}")]
    Other(String),
}
