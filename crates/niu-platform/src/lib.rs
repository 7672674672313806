//! Host integration seams for the niu secure transport.
//!
//! Implements:
//! - `KeyValueStore`: string storage for secret bundles, client id and tokens
//! - `Navigator`: login redirects when a session cannot be refreshed
//! - `Platform`: the platform id carried by signed requests
//! - A JSON file store for desktop hosts, and in-memory mocks for tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod file;
pub mod mock;
pub mod platform;
pub mod traits;

pub use error::{Error, Result};
pub use file::JsonFileStore;
pub use platform::Platform;
pub use traits::{KeyValueStore, Navigator};
