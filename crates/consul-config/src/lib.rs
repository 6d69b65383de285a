//! Consul Config
//!
//! Named clients for a Consul KV store, and a configuration provider that
//! flattens each store's key space into a configuration tree.
//!
//! ## Clients
//!
//! A [`ClientSpec`] declares one client: endpoint, ACL token, credentials,
//! timeouts, headers and pluggable components. [`ClientFactory`] validates it
//! and connects:
//!
//! ```rust,ignore
//! use consul_config::{ClientFactory, ClientSpec};
//!
//! let factory = ClientFactory::default();
//! let client = factory
//!     .build("consul1", &ClientSpec::with_host("10.0.0.1", None).with_acl_token("s3cr3t"))
//!     .await?;
//! ```
//!
//! ## Configuration tree
//!
//! [`ConsulConfigProvider`] reads every key of every registered client and
//! nests it under `<client>.store.<key with / replaced by .>`. The host merges
//! the result under [`CONFIG_ROOT`]:
//!
//! ```rust,ignore
//! provider.add_sources(registry.sources())?;
//! if provider.is_dirty() {
//!     let tree = provider.provide().await?;
//!     tree.get_value("consul1.store.app.db.host");
//! }
//! ```

pub mod error;
pub mod logging;
pub mod config;
pub mod client;
pub mod tree;
pub mod plugin;

// Re-export commonly used types
pub use error::{ConsulError, ConsulResult};

pub use logging::{ConsulEvent, Logger, NoOpLogger, SharedLogger, TracingLogger};

pub use config::{ClientSpec, ConsulConfig, TimeoutSpec};

pub use client::{
    ClientFactory, ClientHandle, ClientRegistry, ComponentRegistry, ConsulClient, HostEnvironment,
    KvError, KvStore, MemoryKvStore,
};

pub use tree::{translate_key, ConfigNode, ConfigurationProvider, ConsulConfigProvider, CONFIG_ROOT};

pub use plugin::ConsulPlugin;
