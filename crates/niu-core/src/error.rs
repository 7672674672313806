//! Error types for protocol operations.

use crate::state::ConnectionState;
use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Protocol operation errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Insufficient data.
    #[error("Insufficient data: need {0} bytes")]
    InsufficientData(usize),

    /// Payload could not be marshaled.
    #[error("Marshal failed: {0}")]
    Marshal(String),

    /// Payload could not be unmarshaled.
    #[error("Unmarshal failed: {0}")]
    Unmarshal(String),

    /// Query map could not be form-encoded.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Connection state machine rejected a transition.
    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// State before the attempted transition.
        from: ConnectionState,
        /// Requested target state.
        to: ConnectionState,
    },
}
