//! Start-up and shutdown of the Consul integration
//!
//! Ties the pieces together the way a host application uses them: build every
//! configured client, expose them by name, register them with a
//! [`ConsulConfigProvider`], and close them all on shutdown.

use std::sync::Arc;

use crate::client::{ClientFactory, ClientHandle, ClientRegistry, RegistryBuild};
use crate::config::ConsulConfig;
use crate::error::{ConsulError, ConsulResult};
use crate::logging::{ConsulEvent, SharedLogger};
use crate::tree::ConsulConfigProvider;

/// Running Consul integration
///
/// # Example
///
/// ```no_run
/// use consul_config::client::ClientFactory;
/// use consul_config::config::ConsulConfig;
/// use consul_config::logging::TracingLogger;
/// use consul_config::plugin::ConsulPlugin;
/// use std::sync::Arc;
///
/// # async fn run() -> consul_config::ConsulResult<()> {
/// let config = ConsulConfig::load_user()?;
/// let mut plugin =
///     ConsulPlugin::initialize(&config, &ClientFactory::default(), Arc::new(TracingLogger::new())).await?;
///
/// if plugin.provider().is_dirty() {
///     let tree = plugin.provider().provide_rooted().await?;
///     println!("{:?}", tree.get("consul.clients"));
/// }
///
/// plugin.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct ConsulPlugin {
    registry: ClientRegistry,
    provider: Arc<ConsulConfigProvider>,
    failed: Vec<String>,
    logger: SharedLogger,
}

impl ConsulPlugin {
    pub const NAME: &'static str = "consul";

    /// Build every configured client and register them as configuration sources
    ///
    /// An empty configuration is not an error: the plugin starts disabled. With
    /// `failFast` set, any failing client aborts start-up after the clients
    /// already built are closed; the error names every failed client. Otherwise
    /// failing clients are reported and left out.
    pub async fn initialize(
        config: &ConsulConfig,
        factory: &ClientFactory,
        logger: SharedLogger,
    ) -> ConsulResult<Self> {
        let provider = Arc::new(ConsulConfigProvider::new(logger.clone()));

        if !config.is_enabled() {
            logger.event(&ConsulEvent::Disabled);
            return Ok(Self {
                registry: ClientRegistry::new(logger.clone()),
                provider,
                failed: Vec::new(),
                logger,
            });
        }

        let RegistryBuild {
            mut registry,
            failures,
        } = ClientRegistry::build(config, factory, logger.clone()).await;

        if config.fail_fast && !failures.is_empty() {
            registry.close_all().await;
            return Err(ConsulError::aggregate(failures));
        }

        let failed: Vec<String> = failures
            .iter()
            .filter_map(|e| e.client())
            .map(String::from)
            .collect();
        if !failed.is_empty() {
            crate::log_warn!(
                logger,
                "Continuing with {} of {} Consul clients, unavailable: {}",
                registry.len(),
                config.clients.len(),
                failed.join(", ")
            );
        }
        Self::started(registry, provider, failed, logger)
    }

    fn started(
        registry: ClientRegistry,
        provider: Arc<ConsulConfigProvider>,
        failed: Vec<String>,
        logger: SharedLogger,
    ) -> ConsulResult<Self> {
        if !registry.is_empty() {
            provider.add_sources(registry.sources())?;
        }
        Ok(Self {
            registry,
            provider,
            failed,
            logger,
        })
    }

    /// Whether at least one client is configured
    pub fn is_enabled(&self) -> bool {
        !self.registry.is_empty() || !self.failed.is_empty()
    }

    /// Client injected under `name`
    pub fn client(&self, name: &str) -> Option<ClientHandle> {
        self.registry.get(name)
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Configuration provider over every built client
    pub fn provider(&self) -> Arc<ConsulConfigProvider> {
        Arc::clone(&self.provider)
    }

    /// Clients that could not be built (degraded start-up only)
    pub fn failed_clients(&self) -> &[String] {
        &self.failed
    }

    /// Close every client
    ///
    /// Best effort: close failures are logged. Calling it again is a no-op.
    /// Returns the number of clients closed cleanly.
    pub async fn stop(&mut self) -> usize {
        let total = self.registry.len();
        let closed = self.registry.close_all().await;
        if total > 0 {
            self.logger.debug(&format!("Closed {} of {} Consul clients", closed, total));
        }
        closed
    }
}

impl std::fmt::Debug for ConsulPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsulPlugin")
            .field("registry", &self.registry)
            .field("provider", &self.provider)
            .field("failed", &self.failed)
            .finish()
    }
}
