//! Transport layer errors.

use thiserror::Error;

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;

/// Transport errors.
#[derive(Debug, Error)]
pub enum Error {
    /// No usable session secrets in storage.
    #[error("Session secrets unavailable")]
    SecretsUnavailable,

    /// Response signature missing or invalid. The body is discarded.
    #[error("Response signature verification failed")]
    SignatureVerificationFailed,

    /// Encrypted response body could not be opened.
    #[error("Response decryption failed: {0}")]
    DecryptionFailed(String),

    /// Response body did not parse as its declared type.
    #[error("Response parse failed: {0}")]
    ResponseParseFailed(String),

    /// Network failure (connect, timeout, reset).
    #[error("Network error: {0}")]
    Network(String),

    /// Server error that persisted through every retry.
    #[error("Server error: HTTP {status}")]
    Server {
        /// Last HTTP status received.
        status: u16,
    },

    /// Non-success status that is not retried.
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// HTTP 401 with automatic handling disabled.
    #[error("Unauthorized")]
    Unauthorized,

    /// Session refresh failed, or the replayed request was still unauthorized.
    #[error("Session refresh failed")]
    RefreshFailed,

    /// Request cancelled by the caller.
    #[error("Request cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage or navigation failure from the host.
    #[error("Storage error: {0}")]
    Storage(#[from] niu_platform::Error),

    /// Channel connection could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Channel closed by the peer.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// No pong within the liveness window.
    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    /// Broker task is gone.
    #[error("Broker stopped")]
    BrokerStopped,

    /// Protocol error from core.
    #[error("Protocol error: {0}")]
    Protocol(#[from] niu_core::Error),

    /// Cryptographic error.
    #[error("Crypto error: {0}")]
    Crypto(#[from] niu_crypto::Error),
}

impl Error {
    /// Whether the request pipeline may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Server { .. })
    }
}
