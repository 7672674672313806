//! In-memory implementations for testing and headless hosts.
//!
//! Provides deterministic behavior for automated tests: the store can be told to
//! fail writes, and the navigator records every location it is sent to.

use crate::error::{Error, Result};
use crate::traits::{KeyValueStore, Navigator};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Thread-safe in-memory key-value store.
///
/// Clones share the same underlying map.
///
/// # Example
///
/// ```
/// use niu_platform::mock::MemoryStore;
/// use niu_platform::traits::KeyValueStore;
///
/// let store = MemoryStore::with_entries([("cid", "0123")]);
/// let shared = store.clone();
/// shared.set("theme", "dark").unwrap();
/// assert_eq!(store.get("theme").unwrap().as_deref(), Some("dark"));
/// assert_eq!(store.len(), 2);
/// ```
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `entries`.
    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            entries: Arc::new(RwLock::new(map)),
            fail_writes: Arc::default(),
        }
    }

    /// Make every subsequent `set`/`remove` fail with `Error::Storage`.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("store is read-only".into()));
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::Storage("lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::Storage("lock poisoned".into()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::Storage("lock poisoned".into()))?;
        entries.remove(key);
        Ok(())
    }
}

/// Navigator that records replacements instead of routing.
///
/// # Example
///
/// ```
/// use niu_platform::mock::RecordingNavigator;
/// use niu_platform::traits::Navigator;
///
/// let nav = RecordingNavigator::at("/settings?tab=2");
/// nav.replace("/login").unwrap();
/// assert_eq!(nav.current_location(), "/login");
/// assert_eq!(nav.replacements(), vec!["/login".to_string()]);
/// ```
#[derive(Clone)]
pub struct RecordingNavigator {
    location: Arc<RwLock<String>>,
    history: Arc<RwLock<Vec<String>>>,
}

impl RecordingNavigator {
    /// Navigator starting at `/`.
    pub fn new() -> Self {
        Self::at("/")
    }

    /// Navigator starting at `location`.
    pub fn at(location: impl Into<String>) -> Self {
        Self {
            location: Arc::new(RwLock::new(location.into())),
            history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Move without recording, as if the user navigated.
    pub fn set_location(&self, location: impl Into<String>) {
        if let Ok(mut current) = self.location.write() {
            *current = location.into();
        }
    }

    /// Every location passed to `replace`, oldest first.
    pub fn replacements(&self) -> Vec<String> {
        self.history.read().map(|h| h.clone()).unwrap_or_default()
    }
}

impl Default for RecordingNavigator {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator for RecordingNavigator {
    fn current_location(&self) -> String {
        self.location.read().map(|l| l.clone()).unwrap_or_default()
    }

    fn replace(&self, location: &str) -> Result<()> {
        self.history
            .write()
            .map_err(|_| Error::Navigation("lock poisoned".into()))?
            .push(location.to_string());
        self.set_location(location);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_missing_key() {
        let store = MemoryStore::new();
        assert_eq!(store.get("nope").unwrap(), None);
        assert!(store.is_empty());
        store.remove("nope").unwrap();
    }

    #[test]
    fn test_memory_store_overwrite() {
        let store = MemoryStore::new();
        store.set("k", "1").unwrap();
        store.set("k", "2").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("2"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_memory_store_failing_writes() {
        let store = MemoryStore::with_entries([("k", "v")]);
        store.fail_writes(true);
        assert!(matches!(store.set("k", "x"), Err(Error::Storage(_))));
        assert!(matches!(store.remove("k"), Err(Error::Storage(_))));
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));

        store.fail_writes(false);
        store.set("k", "x").unwrap();
    }

    #[test]
    fn test_navigator_records_in_order() {
        let nav = RecordingNavigator::new();
        assert_eq!(nav.current_location(), "/");
        nav.replace("/a").unwrap();
        nav.set_location("/b");
        nav.replace("/c").unwrap();
        assert_eq!(nav.replacements(), vec!["/a", "/c"]);
        assert_eq!(nav.current_location(), "/c");
    }
}
