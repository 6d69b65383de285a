//! Named clients built at start-up
//!
//! Each configured client is built independently: one bad client does not
//! prevent the others from being attempted. Whether a failure aborts start-up
//! is left to the caller (see [`RegistryBuild`]).

use std::collections::BTreeMap;
use std::sync::Arc;

use super::factory::ClientFactory;
use super::traits::ClientHandle;
use crate::config::ConsulConfig;
use crate::error::{ConsulError, ConsulResult};
use crate::logging::{ConsulEvent, SharedLogger};

/// Outcome of building every configured client
pub struct RegistryBuild {
    /// Clients that were built
    pub registry: ClientRegistry,
    /// One error per client that could not be built, ordered by client name
    pub failures: Vec<ConsulError>,
}

impl RegistryBuild {
    /// Names of the clients that could not be built
    pub fn failed_names(&self) -> Vec<&str> {
        self.failures.iter().filter_map(|e| e.client()).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Mapping from client name to connected client
///
/// Read-only once built, except for [`close_all`](Self::close_all), which
/// drains it so every handle is closed exactly once.
pub struct ClientRegistry {
    clients: BTreeMap<String, ClientHandle>,
    logger: SharedLogger,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new(logger: SharedLogger) -> Self {
        Self {
            clients: BTreeMap::new(),
            logger,
        }
    }

    /// Build every client declared in `config`
    pub async fn build(config: &ConsulConfig, factory: &ClientFactory, logger: SharedLogger) -> RegistryBuild {
        let mut registry = Self::new(logger);
        let mut failures = Vec::new();

        for (name, spec) in &config.clients {
            match factory.build(name, spec).await {
                Ok(client) => {
                    registry.insert(name.clone(), Arc::new(client));
                }
                Err(e) => {
                    registry.logger.event(&ConsulEvent::ClientRejected {
                        name: name.clone(),
                        reason: e.to_string(),
                    });
                    failures.push(e);
                }
            }
        }

        RegistryBuild { registry, failures }
    }

    /// Register an already connected client
    ///
    /// Returns the handle previously registered under `name`, if any; the
    /// caller becomes responsible for closing it.
    pub fn insert(&mut self, name: impl Into<String>, handle: ClientHandle) -> Option<ClientHandle> {
        let name = name.into();
        self.logger.event(&ConsulEvent::ClientBuilt {
            name: name.clone(),
            target: handle.target(),
        });
        self.clients.insert(name, handle)
    }

    /// Look up a client by name
    pub fn get(&self, name: &str) -> Option<ClientHandle> {
        self.clients.get(name).cloned()
    }

    /// Look up a client by name, failing when it is not configured
    pub fn require(&self, name: &str) -> ConsulResult<ClientHandle> {
        self.get(name)
            .ok_or_else(|| ConsulError::Config(format!("Consul client {} is not configured", name)))
    }

    /// Client names, sorted
    pub fn names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// The name → handle mapping, for registration with a config provider
    pub fn sources(&self) -> BTreeMap<String, ClientHandle> {
        self.clients.clone()
    }

    /// Close every client, best effort
    ///
    /// Close failures are reported as events and do not stop the remaining
    /// clients from being closed. Returns the number of clients closed
    /// cleanly.
    pub async fn close_all(&mut self) -> usize {
        let clients = std::mem::take(&mut self.clients);
        let mut closed = 0;
        for (name, client) in clients {
            match client.close().await {
                Ok(()) => {
                    closed += 1;
                    self.logger.event(&ConsulEvent::ClientClosed { name });
                }
                Err(e) => {
                    self.logger.event(&ConsulEvent::ClientCloseFailed {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }
        closed
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.names())
            .finish()
    }
}
