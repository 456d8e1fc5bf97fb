//! Unified error type for the domru-gateway workspace.

use thiserror::Error;

/// Enumerates all error kinds that can occur across gateway crates.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The credentials store could not be read.
    #[error("load credentials: {0}")]
    LoadFailed(String),

    /// The credentials store could not be written.
    #[error("save credentials: {0}")]
    SaveFailed(String),

    /// No usable token / operator id could be attached to an outbound request.
    #[error("no credentials available: {0}")]
    NoCredentials(String),

    /// The refresh-and-retry protocol is exhausted; the session must be re-established.
    #[error("session expired: {0}")]
    AuthExpired(String),

    /// HTTP transport error (connection refused, timeout, TLS, …).
    #[error("http error: {0}")]
    Http(String),

    /// The upstream API returned a non-success status.
    #[error("upstream error: status={status}, body={body}")]
    Upstream { status: u16, body: String },

    /// A bus command topic did not match the published naming scheme.
    #[error("malformed topic: {0}")]
    MalformedTopic(String),

    /// Message bus (MQTT) client failure.
    #[error("message bus error: {0}")]
    Bus(String),

    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ── Feature-gated From impls ──────────────────────────────────────────────────

#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// Status codes the connection-level retry policy treats as transient.
///
/// `501 Not Implemented` is permanent and excluded.
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || ((500..600).contains(&status) && status != 501)
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, GatewayError>;
