//! Configuration provider backed by KV stores

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use parking_lot::RwLock;

use super::node::{translate_key, ConfigNode, KEY_DELIMITER};
use crate::client::{ClientHandle, KvError, KvResult, KvStore};
use crate::error::{ConsulError, ConsulResult};
use crate::logging::{ConsulEvent, SharedLogger};

/// Root under which the host merges the provided tree
/// (`consul.clients.<name>.store.<path>`)
pub const CONFIG_ROOT: &str = "consul.clients";

/// Node under each client that holds its key space
const STORE_KEY: &str = "store";

/// Value fetches in flight per source
const FETCH_CONCURRENCY: usize = 8;

/// Configuration source consumed by the host's merge engine
///
/// Implementations:
/// - `ConsulConfigProvider`: every key of every registered KV store
#[async_trait]
pub trait ConfigurationProvider: Send + Sync {
    /// Build a fresh configuration tree
    async fn provide(&self) -> ConsulResult<ConfigNode>;

    /// Whether the tree must be rebuilt before next use
    fn is_dirty(&self) -> bool;

    /// Independent provider over the same sources, with its own dirty flag
    fn fork(&self) -> Box<dyn ConfigurationProvider>;
}

/// Flattens the key space of each registered store into
/// `<name>.store.<translated key>`
///
/// The dirty flag is a pair of counters: `generation` moves on every
/// `add_sources`, `provided` records the generation the last successful
/// `provide` started from. A registration racing with a `provide` leaves the
/// provider dirty.
pub struct ConsulConfigProvider {
    sources: RwLock<BTreeMap<String, ClientHandle>>,
    generation: AtomicU64,
    provided: AtomicU64,
    logger: SharedLogger,
}

impl ConsulConfigProvider {
    /// Create a provider with no sources (initially dirty)
    pub fn new(logger: SharedLogger) -> Self {
        Self::with_sources(BTreeMap::new(), logger)
    }

    fn with_sources(sources: BTreeMap<String, ClientHandle>, logger: SharedLogger) -> Self {
        Self {
            sources: RwLock::new(sources),
            generation: AtomicU64::new(1),
            provided: AtomicU64::new(0),
            logger,
        }
    }

    /// Register named stores
    ///
    /// Always marks the provider dirty, even when the names are already
    /// registered. Fails with [`ConsulError::NullSources`] when empty.
    pub fn add_sources<I>(&self, sources: I) -> ConsulResult<()>
    where
        I: IntoIterator<Item = (String, ClientHandle)>,
    {
        let mut sources = sources.into_iter().peekable();
        if sources.peek().is_none() {
            return Err(ConsulError::NullSources);
        }

        let mut registered = self.sources.write();
        registered.extend(sources);
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Registered source names, sorted
    pub fn source_names(&self) -> Vec<String> {
        self.sources.read().keys().cloned().collect()
    }

    pub fn is_dirty(&self) -> bool {
        self.provided.load(Ordering::SeqCst) != self.generation.load(Ordering::SeqCst)
    }

    /// Same sources, fresh (dirty) state
    pub fn fork(&self) -> Self {
        Self::with_sources(self.sources.read().clone(), self.logger.clone())
    }

    /// Build the tree and nest it under [`CONFIG_ROOT`]
    pub async fn provide_rooted(&self) -> ConsulResult<ConfigNode> {
        Ok(self.provide().await?.rooted(CONFIG_ROOT))
    }
}

/// Read every key of one store into a tree
async fn fetch_store(store: &dyn KvStore) -> KvResult<ConfigNode> {
    let keys = store.list_keys("").await?;

    let fetches = keys.into_iter().map(move |key| async move {
        if key.ends_with(KEY_DELIMITER) {
            return Ok((key, ConfigNode::map()));
        }
        // Deleted since it was listed
        let value = store.get_value(&key).await?.unwrap_or_default();
        Ok::<_, KvError>((key, ConfigNode::Value(value)))
    });
    let mut entries: Vec<(String, ConfigNode)> = stream::iter(fetches)
        .buffer_unordered(FETCH_CONCURRENCY)
        .try_collect()
        .await?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut tree = ConfigNode::map();
    for (key, node) in entries {
        tree.set(&translate_key(&key), node);
    }
    Ok(tree)
}

#[async_trait]
impl ConfigurationProvider for ConsulConfigProvider {
    async fn provide(&self) -> ConsulResult<ConfigNode> {
        let (generation, sources) = {
            let sources = self.sources.read();
            (self.generation.load(Ordering::SeqCst), sources.clone())
        };

        let mut tree = ConfigNode::map();
        for (name, store) in &sources {
            let node = fetch_store(store.as_ref()).await.map_err(|e| {
                self.logger.event(&ConsulEvent::SourceUnreachable {
                    name: name.clone(),
                    reason: e.to_string(),
                });
                ConsulError::source_unavailable(name.clone(), e)
            })?;
            tree.set_segments([name.as_str(), STORE_KEY], node);
        }

        self.provided.fetch_max(generation, Ordering::SeqCst);
        Ok(tree)
    }

    fn is_dirty(&self) -> bool {
        ConsulConfigProvider::is_dirty(self)
    }

    fn fork(&self) -> Box<dyn ConfigurationProvider> {
        Box::new(ConsulConfigProvider::fork(self))
    }
}

impl std::fmt::Debug for ConsulConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsulConfigProvider")
            .field("sources", &self.source_names())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryKvStore;
    use crate::logging::NoOpLogger;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::{Arc, Weak};

    type AfterList = Box<dyn FnOnce() + Send>;

    /// Runs a callback once, between listing keys and fetching values
    struct InterleavedStore {
        inner: Arc<MemoryKvStore>,
        after_list: Mutex<Option<AfterList>>,
    }

    impl InterleavedStore {
        fn new(inner: Arc<MemoryKvStore>, after_list: AfterList) -> Self {
            Self {
                inner,
                after_list: Mutex::new(Some(after_list)),
            }
        }
    }

    #[async_trait]
    impl KvStore for InterleavedStore {
        fn name(&self) -> &str {
            self.inner.name()
        }
        fn target(&self) -> String {
            self.inner.target()
        }
        async fn list_keys(&self, prefix: &str) -> KvResult<Vec<String>> {
            let keys = self.inner.list_keys(prefix).await?;
            let callback = self.after_list.lock().take();
            if let Some(callback) = callback {
                callback();
            }
            Ok(keys)
        }
        async fn get_value(&self, key: &str) -> KvResult<Option<String>> {
            self.inner.get_value(key).await
        }
        async fn close(&self) -> KvResult<()> {
            self.inner.close().await
        }
    }

    fn provider() -> ConsulConfigProvider {
        ConsulConfigProvider::new(Arc::new(NoOpLogger::new()))
    }

    fn source(name: &str, store: impl KvStore + 'static) -> (String, ClientHandle) {
        (name.to_string(), Arc::new(store))
    }

    fn db_store(name: &str) -> MemoryKvStore {
        MemoryKvStore::new(name)
            .with_entry("app/db/host", "localhost")
            .with_entry("app/db/port", "5432")
    }

    #[tokio::test]
    async fn test_store_flattened_under_client_name() {
        let provider = provider();
        provider.add_sources([source("c1", db_store("c1"))]).unwrap();

        let tree = provider.provide().await.unwrap();
        assert_eq!(
            serde_json::to_value(&tree).unwrap(),
            json!({"c1": {"store": {"app": {"db": {"host": "localhost", "port": "5432"}}}}})
        );

        let rooted = provider.provide_rooted().await.unwrap();
        assert_eq!(
            rooted.get_value("consul.clients.c1.store.app.db.port"),
            Some("5432")
        );
    }

    #[tokio::test]
    async fn test_multiple_sources_and_folders() {
        let provider = provider();
        let other = MemoryKvStore::new("my.consul")
            .with_entry("flags/", "")
            .with_entry("top", "1");
        provider
            .add_sources([source("c1", db_store("c1")), source("my.consul", other)])
            .unwrap();

        let tree = provider.provide().await.unwrap();
        let clients = tree.as_map().unwrap();
        assert_eq!(clients.len(), 2);
        assert_eq!(clients["my.consul"].get_value("store.top"), Some("1"));
        assert!(clients["my.consul"].get("store.flags").unwrap().is_empty());
        assert_eq!(tree.get_value("c1.store.app.db.host"), Some("localhost"));
    }

    #[tokio::test]
    async fn test_key_deleted_after_listing_is_empty() {
        let inner = Arc::new(db_store("c1"));
        let deleter = Arc::clone(&inner);
        let store = InterleavedStore::new(
            inner,
            Box::new(move || {
                deleter.delete("app/db/port");
            }),
        );
        let provider = provider();
        provider.add_sources([source("c1", store)]).unwrap();

        let tree = provider.provide().await.unwrap();
        assert_eq!(tree.get_value("c1.store.app.db.port"), Some(""));
        assert_eq!(tree.get_value("c1.store.app.db.host"), Some("localhost"));
        assert!(!provider.is_dirty());
    }

    #[tokio::test]
    async fn test_dirty_transitions() {
        let provider = provider();
        assert!(provider.is_dirty());

        provider.add_sources([source("c1", db_store("c1"))]).unwrap();
        assert!(provider.is_dirty());

        let first = provider.provide().await.unwrap();
        assert!(!provider.is_dirty());
        let second = provider.provide().await.unwrap();
        assert!(!provider.is_dirty());
        assert_eq!(first, second);

        // Re-registering the same name still invalidates
        provider.add_sources([source("c1", db_store("c1"))]).unwrap();
        assert!(provider.is_dirty());
    }

    #[tokio::test]
    async fn test_registration_during_provide_stays_dirty() {
        let provider = Arc::new(provider());
        let weak: Weak<ConsulConfigProvider> = Arc::downgrade(&provider);
        let store = InterleavedStore::new(
            Arc::new(db_store("c1")),
            Box::new(move || {
                if let Some(provider) = weak.upgrade() {
                    provider
                        .add_sources([source("late", MemoryKvStore::new("late"))])
                        .unwrap();
                }
            }),
        );
        provider.add_sources([source("c1", store)]).unwrap();

        let tree = provider.provide().await.unwrap();
        assert!(tree.get("late").is_none());
        assert!(provider.is_dirty());

        let tree = provider.provide().await.unwrap();
        assert!(tree.get("late.store").unwrap().is_empty());
        assert!(!provider.is_dirty());
    }

    #[tokio::test]
    async fn test_fork_is_dirty_and_independent() {
        let provider = provider();
        provider.add_sources([source("c1", db_store("c1"))]).unwrap();
        provider.provide().await.unwrap();
        assert!(!provider.is_dirty());

        let fork = ConfigurationProvider::fork(&provider);
        assert!(fork.is_dirty());
        let tree = fork.provide().await.unwrap();
        assert_eq!(tree.get_value("c1.store.app.db.host"), Some("localhost"));
        assert!(!fork.is_dirty());

        provider.add_sources([source("c2", MemoryKvStore::new("c2"))]).unwrap();
        assert!(provider.is_dirty());
        assert!(!fork.is_dirty());
    }

    #[test]
    fn test_empty_sources_rejected() {
        let provider = provider();
        let none: Vec<(String, ClientHandle)> = Vec::new();
        assert!(matches!(provider.add_sources(none), Err(ConsulError::NullSources)));
        assert!(provider.source_names().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_source_aborts_provide() {
        let down = Arc::new(db_store("c2"));
        down.set_unavailable(true);
        let provider = provider();
        provider.add_sources([source("c1", db_store("c1"))]).unwrap();
        provider.add_sources([("c2".to_string(), down.clone() as ClientHandle)]).unwrap();

        let err = provider.provide().await.unwrap_err();
        assert!(matches!(&err, ConsulError::SourceUnavailable { client, .. } if client == "c2"));
        assert!(provider.is_dirty());

        down.set_unavailable(false);
        assert!(provider.provide().await.is_ok());
        assert!(!provider.is_dirty());
    }
}
