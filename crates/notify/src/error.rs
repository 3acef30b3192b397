//! Error types for the notification system.

use thiserror::Error;

/// Errors that can occur when delivering notifications.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Channel is not configured
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Webhook signature could not be computed
    #[error("Failed to sign webhook payload: {0}")]
    Signing(String),

    /// The webhook answered with a non-success HTTP status
    #[error("Webhook returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The webhook accepted the request but reported an application error
    #[error("Webhook rejected message, code {code}: {message}")]
    Rejected { code: i64, message: String },
}
