//! In-memory KV store

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::traits::{KvError, KvResult, KvStore};

/// In-memory KV store for testing and local overrides
///
/// Keys are kept sorted. The store can be switched to an unavailable state to
/// exercise the refresh error path.
///
/// # Example
///
/// ```
/// use consul_config::client::MemoryKvStore;
///
/// let store = MemoryKvStore::new("local")
///     .with_entry("app/db/host", "localhost")
///     .with_entry("app/db/port", "5432");
/// assert_eq!(store.len(), 2);
/// ```
#[derive(Debug)]
pub struct MemoryKvStore {
    name: String,
    entries: RwLock<BTreeMap<String, String>>,
    unavailable: AtomicBool,
    closed: AtomicBool,
}

impl MemoryKvStore {
    /// Create an empty store
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(BTreeMap::new()),
            unavailable: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a store with initial entries
    pub fn with_entries<K, V>(name: impl Into<String>, entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new(name);
        {
            let mut guard = store.entries.write();
            for (key, value) in entries {
                guard.insert(key.into(), value.into());
            }
        }
        store
    }

    /// Add an entry (builder style)
    pub fn with_entry(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.put(key, value);
        self
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.write().insert(key.into(), value.into());
    }

    pub fn delete(&self, key: &str) -> Option<String> {
        self.entries.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every call fail with [`KvError::Unreachable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_reachable(&self) -> KvResult<()> {
        if self.is_closed() {
            return Err(KvError::Closed);
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KvError::Unreachable(format!("memory store {} is offline", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn target(&self) -> String {
        format!("memory:{}", self.name)
    }

    async fn list_keys(&self, prefix: &str) -> KvResult<Vec<String>> {
        self.ensure_reachable()?;
        let entries = self.entries.read();
        Ok(entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get_value(&self, key: &str) -> KvResult<Option<String>> {
        self.ensure_reachable()?;
        Ok(self.entries.read().get(key).cloned())
    }

    async fn close(&self) -> KvResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(KvError::Closed);
        }
        Ok(())
    }
}
