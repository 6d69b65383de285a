//! Pluggable client components and the registry that constructs them
//!
//! A `ClientSpec` names components by type identifier. The host registers a
//! zero-argument factory for each identifier it supports; the factory is
//! called once per client that references it.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;

use super::traits::KvResult;

/// Role a component plays in a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentRole {
    HostnameVerifier,
    TlsContext,
    Executor,
    Proxy,
    RequestHook,
}

impl ComponentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentRole::HostnameVerifier => "hostnameVerifier",
            ComponentRole::TlsContext => "tlsContext",
            ComponentRole::Executor => "executor",
            ComponentRole::Proxy => "proxy",
            ComponentRole::RequestHook => "requestHook",
        }
    }
}

impl fmt::Display for ComponentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approves the host a client connects to
pub trait HostnameVerifier: Send + Sync {
    /// Return `false` to refuse connecting to `hostname`
    fn verify(&self, hostname: &str) -> bool;
}

/// Request about to be sent by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub client: String,
    pub method: String,
    pub url: String,
}

/// Result of a request, as seen by a hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Status(u16),
    Failed(String),
}

/// Called around every request a client sends
pub trait RequestHook: Send + Sync {
    fn before(&self, _request: &RequestInfo) {}

    fn after(&self, _request: &RequestInfo, _outcome: &RequestOutcome) {}
}

/// TLS settings applied to a client
///
/// Supplied either by a component factory or by the host environment.
#[derive(Clone, Default)]
pub struct TlsContext {
    root_certificates: Vec<reqwest::Certificate>,
    accept_invalid_certs: bool,
}

impl TlsContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust the CA certificate(s) in a PEM bundle
    pub fn from_pem(pem: &[u8]) -> KvResult<Self> {
        let certificates = reqwest::Certificate::from_pem_bundle(pem)?;
        Ok(Self {
            root_certificates: certificates,
            accept_invalid_certs: false,
        })
    }

    /// Trust an additional CA certificate
    pub fn with_root_certificate(mut self, certificate: reqwest::Certificate) -> Self {
        self.root_certificates.push(certificate);
        self
    }

    /// Skip certificate validation (development agents with self-signed certs)
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn root_certificate_count(&self) -> usize {
        self.root_certificates.len()
    }

    pub(crate) fn apply(&self, mut builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        for certificate in &self.root_certificates {
            builder = builder.add_root_certificate(certificate.clone());
        }
        builder.danger_accept_invalid_certs(self.accept_invalid_certs)
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("root_certificates", &self.root_certificates.len())
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

/// Why a component could not be obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentError {
    /// No factory is registered under the identifier
    NotAccessible,
    /// The factory failed
    NotConstructible(String),
}

/// Error returned by a component factory
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Zero-argument factory for a component
pub type ComponentFactory<T> = Box<dyn Fn() -> Result<T, BoxError> + Send + Sync>;

/// Registry of component factories, keyed by role and type identifier
///
/// # Example
///
/// ```
/// use consul_config::client::{ComponentRegistry, HostnameVerifier};
/// use std::sync::Arc;
///
/// struct InternalOnly;
///
/// impl HostnameVerifier for InternalOnly {
///     fn verify(&self, hostname: &str) -> bool {
///         hostname.ends_with(".internal")
///     }
/// }
///
/// let mut components = ComponentRegistry::new();
/// components.register_hostname_verifier("internal-only", || Ok(Arc::new(InternalOnly)));
/// assert!(components.has(consul_config::client::ComponentRole::HostnameVerifier, "internal-only"));
/// ```
#[derive(Default)]
pub struct ComponentRegistry {
    hostname_verifiers: HashMap<String, ComponentFactory<Arc<dyn HostnameVerifier>>>,
    tls_contexts: HashMap<String, ComponentFactory<TlsContext>>,
    executors: HashMap<String, ComponentFactory<Handle>>,
    proxies: HashMap<String, ComponentFactory<reqwest::Proxy>>,
    request_hooks: HashMap<String, ComponentFactory<Arc<dyn RequestHook>>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_hostname_verifier<F>(&mut self, type_id: &str, factory: F)
    where
        F: Fn() -> Result<Arc<dyn HostnameVerifier>, BoxError> + Send + Sync + 'static,
    {
        self.hostname_verifiers.insert(type_id.to_string(), Box::new(factory));
    }

    pub fn register_tls_context<F>(&mut self, type_id: &str, factory: F)
    where
        F: Fn() -> Result<TlsContext, BoxError> + Send + Sync + 'static,
    {
        self.tls_contexts.insert(type_id.to_string(), Box::new(factory));
    }

    pub fn register_executor<F>(&mut self, type_id: &str, factory: F)
    where
        F: Fn() -> Result<Handle, BoxError> + Send + Sync + 'static,
    {
        self.executors.insert(type_id.to_string(), Box::new(factory));
    }

    pub fn register_proxy<F>(&mut self, type_id: &str, factory: F)
    where
        F: Fn() -> Result<reqwest::Proxy, BoxError> + Send + Sync + 'static,
    {
        self.proxies.insert(type_id.to_string(), Box::new(factory));
    }

    pub fn register_request_hook<F>(&mut self, type_id: &str, factory: F)
    where
        F: Fn() -> Result<Arc<dyn RequestHook>, BoxError> + Send + Sync + 'static,
    {
        self.request_hooks.insert(type_id.to_string(), Box::new(factory));
    }

    /// Check if a factory is registered
    pub fn has(&self, role: ComponentRole, type_id: &str) -> bool {
        match role {
            ComponentRole::HostnameVerifier => self.hostname_verifiers.contains_key(type_id),
            ComponentRole::TlsContext => self.tls_contexts.contains_key(type_id),
            ComponentRole::Executor => self.executors.contains_key(type_id),
            ComponentRole::Proxy => self.proxies.contains_key(type_id),
            ComponentRole::RequestHook => self.request_hooks.contains_key(type_id),
        }
    }

    /// Registered identifiers for a role, sorted
    pub fn type_ids(&self, role: ComponentRole) -> Vec<String> {
        let mut ids: Vec<String> = match role {
            ComponentRole::HostnameVerifier => self.hostname_verifiers.keys().cloned().collect(),
            ComponentRole::TlsContext => self.tls_contexts.keys().cloned().collect(),
            ComponentRole::Executor => self.executors.keys().cloned().collect(),
            ComponentRole::Proxy => self.proxies.keys().cloned().collect(),
            ComponentRole::RequestHook => self.request_hooks.keys().cloned().collect(),
        };
        ids.sort();
        ids
    }

    pub fn hostname_verifier(&self, type_id: &str) -> Result<Arc<dyn HostnameVerifier>, ComponentError> {
        construct(&self.hostname_verifiers, type_id)
    }

    pub fn tls_context(&self, type_id: &str) -> Result<TlsContext, ComponentError> {
        construct(&self.tls_contexts, type_id)
    }

    pub fn executor(&self, type_id: &str) -> Result<Handle, ComponentError> {
        construct(&self.executors, type_id)
    }

    pub fn proxy(&self, type_id: &str) -> Result<reqwest::Proxy, ComponentError> {
        construct(&self.proxies, type_id)
    }

    pub fn request_hook(&self, type_id: &str) -> Result<Arc<dyn RequestHook>, ComponentError> {
        construct(&self.request_hooks, type_id)
    }
}

fn construct<T>(
    factories: &HashMap<String, ComponentFactory<T>>,
    type_id: &str,
) -> Result<T, ComponentError> {
    let factory = factories.get(type_id).ok_or(ComponentError::NotAccessible)?;
    factory().map_err(|e| ComponentError::NotConstructible(e.to_string()))
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("hostname_verifiers", &self.type_ids(ComponentRole::HostnameVerifier))
            .field("tls_contexts", &self.type_ids(ComponentRole::TlsContext))
            .field("executors", &self.type_ids(ComponentRole::Executor))
            .field("proxies", &self.type_ids(ComponentRole::Proxy))
            .field("request_hooks", &self.type_ids(ComponentRole::RequestHook))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AllowAll;

    impl HostnameVerifier for AllowAll {
        fn verify(&self, _hostname: &str) -> bool {
            true
        }
    }

    #[test]
    fn test_unknown_type_is_not_accessible() {
        let registry = ComponentRegistry::new();
        assert_eq!(
            registry.hostname_verifier("missing").err(),
            Some(ComponentError::NotAccessible)
        );
    }

    #[test]
    fn test_failing_factory_is_not_constructible() {
        let mut registry = ComponentRegistry::new();
        registry.register_proxy("corp", || Ok(reqwest::Proxy::all("http://[invalid")?));

        assert!(matches!(
            registry.proxy("corp"),
            Err(ComponentError::NotConstructible(_))
        ));
    }

    #[test]
    fn test_register_and_construct() {
        let mut registry = ComponentRegistry::new();
        registry.register_hostname_verifier("allow-all", || Ok(Arc::new(AllowAll)));
        registry.register_tls_context("insecure", || Ok(TlsContext::new().accept_invalid_certs(true)));

        assert!(registry.has(ComponentRole::HostnameVerifier, "allow-all"));
        assert!(!registry.has(ComponentRole::Proxy, "allow-all"));
        assert!(registry.hostname_verifier("allow-all").unwrap().verify("anything"));
        assert_eq!(registry.tls_context("insecure").unwrap().root_certificate_count(), 0);
        assert_eq!(registry.type_ids(ComponentRole::TlsContext), vec!["insecure".to_string()]);
    }

    #[test]
    fn test_factory_called_per_resolution() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut registry = ComponentRegistry::new();
        registry.register_tls_context(
            "counted",
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(TlsContext::new())
            },
        );

        registry.tls_context("counted").unwrap();
        registry.tls_context("counted").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
