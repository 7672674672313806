//! Abstractions over host storage and navigation.
//!
//! The secure client persists its secret bundles, client id and access token in a
//! string key-value store, and asks the host to navigate to the login page when a
//! session cannot be refreshed. Both are injected so hosts and tests can supply
//! their own implementations.

use crate::error::Result;

/// String key-value store (browser local storage, a settings file, a keychain item).
///
/// # Example
///
/// ```
/// use niu_platform::mock::MemoryStore;
/// use niu_platform::traits::KeyValueStore;
///
/// let store = MemoryStore::new();
/// store.set("theme", "auto").unwrap();
/// assert_eq!(store.get("theme").unwrap().as_deref(), Some("auto"));
/// store.remove("theme").unwrap();
/// assert_eq!(store.get("theme").unwrap(), None);
/// ```
pub trait KeyValueStore: Send + Sync {
    /// Read a value. Missing keys are `Ok(None)`.
    ///
    /// # Errors
    ///
    /// - `Error::Storage` if the backing store cannot be read
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// - `Error::Storage` if the backing store cannot be written
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Host navigation (a router, a desktop shell window, a CLI prompt).
pub trait Navigator: Send + Sync {
    /// Current location as `path` plus optional `?query`.
    fn current_location(&self) -> String;

    /// Replace the current location without adding a history entry.
    ///
    /// # Errors
    ///
    /// - `Error::Navigation` if the host refuses the location
    fn replace(&self, location: &str) -> Result<()>;
}
