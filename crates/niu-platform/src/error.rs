//! Platform integration errors.

use thiserror::Error;

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;

/// Platform errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Key-value storage failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Navigation request failed.
    #[error("Navigation error: {0}")]
    Navigation(String),

    /// Unknown platform name or id.
    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),
}
