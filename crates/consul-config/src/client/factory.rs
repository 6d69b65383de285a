//! Client construction
//!
//! Building a client happens in two phases:
//!
//! 1. [`ClientFactory::prepare`] validates a [`ClientSpec`] and resolves every
//!    declared option into [`ConnectionSettings`]. No network I/O happens here,
//!    so a misconfigured client fails before anything is sent.
//! 2. [`ConnectionSettings::connect`] builds the HTTP client and, unless
//!    disabled, pings the agent. Any failure here is a
//!    [`ConsulError::ClientCreationFailed`].
//!
//! There are no retries; a failed build is reported to the caller once.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use tokio::runtime::Handle;

use super::components::{
    ComponentError, ComponentRegistry, ComponentRole, HostnameVerifier, RequestHook, TlsContext,
};
use super::http::{ConsulClient, TOKEN_HEADER};
use super::traits::KvError;
use crate::config::{ClientSpec, Endpoint};
use crate::error::{ConsulError, ConsulResult};
use crate::logging::{NoOpLogger, SharedLogger};

/// Environment variables checked for a process-wide proxy, in order
const PROXY_ENV_VARS: [&str; 6] = [
    "HTTPS_PROXY",
    "https_proxy",
    "HTTP_PROXY",
    "http_proxy",
    "ALL_PROXY",
    "all_proxy",
];

/// Settings owned by the host rather than by a single client
#[derive(Debug, Clone, Default)]
pub struct HostEnvironment {
    /// TLS context used by clients that do not name their own
    pub tls: Option<TlsContext>,
    /// Process-wide proxy; wins over a per-client proxy
    pub proxy: Option<reqwest::Proxy>,
}

impl HostEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the proxy from the usual environment variables
    ///
    /// Unparsable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env), with variables read through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let proxy = PROXY_ENV_VARS
            .iter()
            .filter_map(|var| lookup(var))
            .find(|value| !value.is_empty())
            .and_then(|value| reqwest::Proxy::all(value.as_str()).ok());
        Self { tls: None, proxy }
    }

    pub fn with_tls(mut self, tls: TlsContext) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_proxy(mut self, proxy: reqwest::Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }
}

/// Where the proxy of a client comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxySource {
    /// The host environment's proxy
    Host,
    /// The client's own proxy component
    Client,
    /// No proxy; environment proxies are ignored too
    Direct,
}

/// Fully resolved options of one client, ready to connect
pub struct ConnectionSettings {
    name: String,
    endpoint: Endpoint,
    base_url: String,
    ping: bool,
    basic_auth: Option<(String, String)>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    hostname_verifier: Option<Arc<dyn HostnameVerifier>>,
    tls: Option<TlsContext>,
    executor: Option<Handle>,
    proxy: Option<reqwest::Proxy>,
    proxy_source: ProxySource,
    request_hook: Option<Arc<dyn RequestHook>>,
    headers: HeaderMap,
}

impl ConnectionSettings {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// URL requests will be sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn ping(&self) -> bool {
        self.ping
    }

    pub fn has_basic_auth(&self) -> bool {
        self.basic_auth.is_some()
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    pub fn has_hostname_verifier(&self) -> bool {
        self.hostname_verifier.is_some()
    }

    pub fn tls(&self) -> Option<&TlsContext> {
        self.tls.as_ref()
    }

    pub fn has_executor(&self) -> bool {
        self.executor.is_some()
    }

    pub fn proxy_source(&self) -> ProxySource {
        self.proxy_source
    }

    pub fn has_request_hook(&self) -> bool {
        self.request_hook.is_some()
    }

    /// Headers sent with every request, ACL token included
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Build the HTTP client and check the agent is alive
    pub async fn connect(self) -> ConsulResult<ConsulClient> {
        let name = self.name;
        let fail = |e: KvError| ConsulError::creation_failed(name.clone(), e);

        let url = Url::parse(&self.base_url)
            .map_err(|e| fail(KvError::InvalidUrl(format!("{}: {}", self.base_url, e))))?;

        if let Some(verifier) = &self.hostname_verifier {
            let host = url.host_str().unwrap_or_default();
            if !verifier.verify(host) {
                return Err(fail(KvError::HostnameRejected(host.to_string())));
            }
        }

        let mut builder = reqwest::Client::builder().default_headers(self.headers);
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(timeout) = self.read_timeout {
            builder = builder.read_timeout(timeout);
        }
        // reqwest has no write-phase timeout; the write timeout bounds the whole request
        if let Some(timeout) = self.write_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(tls) = &self.tls {
            builder = tls.apply(builder);
        }
        builder = match self.proxy {
            Some(proxy) => builder.proxy(proxy),
            None => builder.no_proxy(),
        };
        let http = builder.build().map_err(|e| fail(KvError::Http(e)))?;

        let client = ConsulClient::new(
            name.clone(),
            url,
            http,
            self.basic_auth,
            self.executor,
            self.request_hook,
        );
        if self.ping {
            client.ping().await.map_err(fail)?;
        }
        Ok(client)
    }
}

impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("ping", &self.ping)
            .field("basic_auth", &self.basic_auth.is_some())
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("tls", &self.tls)
            .field("proxy_source", &self.proxy_source)
            .finish()
    }
}

/// Builds connected clients from their declared configuration
///
/// # Example
///
/// ```no_run
/// use consul_config::client::{ClientFactory, ComponentRegistry, HostEnvironment};
/// use consul_config::config::ClientSpec;
///
/// # async fn run() -> consul_config::ConsulResult<()> {
/// let factory = ClientFactory::new(ComponentRegistry::new(), HostEnvironment::from_env());
/// let client = factory
///     .build("consul1", &ClientSpec::with_url("http://127.0.0.1:8500"))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ClientFactory {
    components: ComponentRegistry,
    host: HostEnvironment,
    logger: SharedLogger,
}

/// No components; the process-wide proxy comes from the environment
impl Default for ClientFactory {
    fn default() -> Self {
        Self::new(ComponentRegistry::new(), HostEnvironment::from_env())
    }
}

impl ClientFactory {
    pub fn new(components: ComponentRegistry, host: HostEnvironment) -> Self {
        Self {
            components,
            host,
            logger: Arc::new(NoOpLogger::new()),
        }
    }

    pub fn with_logger(mut self, logger: SharedLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    pub fn host(&self) -> &HostEnvironment {
        &self.host
    }

    /// Validate `spec` and resolve all of its options, without any I/O
    pub fn prepare(&self, name: &str, spec: &ClientSpec) -> ConsulResult<ConnectionSettings> {
        // Endpoint
        let endpoint = spec.endpoint(name)?;
        if matches!(endpoint, Endpoint::Url(_)) && spec.host.as_deref().is_some_and(|h| !h.is_empty()) {
            crate::log_debug!(self.logger, "Consul client {} declares both url and host, using url", name);
        }

        let mut headers = HeaderMap::new();

        // ACL token
        if let Some(token) = spec.acl_token() {
            let mut value = HeaderValue::from_str(token).map_err(|_| ConsulError::InvalidHeader {
                client: name.to_string(),
                name: TOKEN_HEADER.to_string(),
            })?;
            value.set_sensitive(true);
            headers.insert(HeaderName::from_static(TOKEN_HEADER), value);
        }

        // Credentials
        let basic_auth = spec
            .basic_auth()
            .map(|(user, password)| (user.to_string(), password.to_string()));

        // Timeouts
        let connect_timeout = parse_millis(name, "connect", spec.timeouts.connect.as_deref())?;
        let read_timeout = parse_millis(name, "read", spec.timeouts.read.as_deref())?;
        let write_timeout = parse_millis(name, "write", spec.timeouts.write.as_deref())?;

        // Components
        let refs = &spec.components;
        let hostname_verifier = self.resolve(name, ComponentRole::HostnameVerifier, &refs.hostname_verifier, |id| {
            self.components.hostname_verifier(id)
        })?;
        let tls = self
            .resolve(name, ComponentRole::TlsContext, &refs.tls_context, |id| {
                self.components.tls_context(id)
            })?
            .or_else(|| self.host.tls.clone());
        let executor = self.resolve(name, ComponentRole::Executor, &refs.executor, |id| {
            self.components.executor(id)
        })?;
        let client_proxy = self.resolve(name, ComponentRole::Proxy, &refs.proxy, |id| {
            self.components.proxy(id)
        })?;
        let request_hook = self.resolve(name, ComponentRole::RequestHook, &refs.request_hook, |id| {
            self.components.request_hook(id)
        })?;

        let (proxy, proxy_source) = match (&self.host.proxy, client_proxy) {
            (Some(host_proxy), _) => (Some(host_proxy.clone()), ProxySource::Host),
            (None, Some(proxy)) => (Some(proxy), ProxySource::Client),
            (None, None) => (None, ProxySource::Direct),
        };

        // Custom headers, forwarded as declared
        for (header, value) in &spec.headers {
            let invalid = || ConsulError::InvalidHeader {
                client: name.to_string(),
                name: header.clone(),
            };
            let header_name = HeaderName::from_bytes(header.as_bytes()).map_err(|_| invalid())?;
            let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            headers.insert(header_name, header_value);
        }

        let base_url = endpoint.base_url(tls.is_some());
        Ok(ConnectionSettings {
            name: name.to_string(),
            endpoint,
            base_url,
            ping: spec.ping,
            basic_auth,
            connect_timeout,
            read_timeout,
            write_timeout,
            hostname_verifier,
            tls,
            executor,
            proxy,
            proxy_source,
            request_hook,
            headers,
        })
    }

    /// Build and connect a client
    pub async fn build(&self, name: &str, spec: &ClientSpec) -> ConsulResult<ConsulClient> {
        let settings = self.prepare(name, spec)?;
        crate::log_info!(
            self.logger,
            "Creating Consul client {} for remote instance at {}",
            name,
            settings.base_url()
        );
        settings.connect().await
    }

    fn resolve<T>(
        &self,
        name: &str,
        role: ComponentRole,
        type_id: &Option<String>,
        construct: impl FnOnce(&str) -> Result<T, ComponentError>,
    ) -> ConsulResult<Option<T>> {
        let Some(type_id) = type_id.as_deref().filter(|id| !id.is_empty()) else {
            return Ok(None);
        };
        construct(type_id).map(Some).map_err(|e| match e {
            ComponentError::NotAccessible => ConsulError::ComponentNotAccessible {
                client: name.to_string(),
                role: role.to_string(),
                type_id: type_id.to_string(),
            },
            ComponentError::NotConstructible(reason) => ConsulError::ComponentNotConstructible {
                client: name.to_string(),
                role: role.to_string(),
                type_id: type_id.to_string(),
                reason,
            },
        })
    }
}

/// Parse a timeout in milliseconds; absent values stay unset
fn parse_millis(name: &str, field: &str, raw: Option<&str>) -> ConsulResult<Option<Duration>> {
    match raw {
        None => Ok(None),
        Some(raw) => raw
            .parse::<u64>()
            .map(|millis| Some(Duration::from_millis(millis)))
            .map_err(|_| ConsulError::invalid_number(name, field, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeoutSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct DenyAll;

    impl HostnameVerifier for DenyAll {
        fn verify(&self, _hostname: &str) -> bool {
            false
        }
    }

    fn factory_with_components() -> ClientFactory {
        let mut components = ComponentRegistry::new();
        components.register_hostname_verifier("deny-all", || Ok(Arc::new(DenyAll)));
        components.register_tls_context("corp-ca", || Ok(TlsContext::new().accept_invalid_certs(true)));
        components.register_proxy("corp-proxy", || Ok(reqwest::Proxy::all("http://proxy.corp:3128")?));
        components.register_executor("broken", || Err("no runtime available".into()));
        ClientFactory::new(components, HostEnvironment::new())
    }

    #[test]
    fn test_url_takes_precedence() {
        let mut spec = ClientSpec::with_url("http://10.0.0.1:8500");
        spec.host = Some("10.0.0.2".to_string());
        spec.port = Some(8500);

        let settings = ClientFactory::default().prepare("c1", &spec).unwrap();
        assert_eq!(settings.base_url(), "http://10.0.0.1:8500");
    }

    #[test]
    fn test_host_with_default_port() {
        let settings = ClientFactory::default()
            .prepare("c2", &ClientSpec::with_host("10.0.0.2", None))
            .unwrap();
        assert_eq!(settings.base_url(), "http://10.0.0.2:8500");
        assert!(settings.ping());
    }

    #[test]
    fn test_missing_endpoint() {
        let result = ClientFactory::default().prepare("c3", &ClientSpec::default());
        assert!(matches!(
            result,
            Err(ConsulError::MissingEndpoint { client }) if client == "c3"
        ));
    }

    #[tokio::test]
    async fn test_missing_endpoint_never_connects() {
        let mut components = ComponentRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        components.register_request_hook(
            "count",
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(NoopHook))
            },
        );
        let factory = ClientFactory::new(components, HostEnvironment::new());
        let spec = ClientSpec::default().with_component(ComponentRole::RequestHook, "count");

        let result = factory.build("c3", &spec).await;
        assert!(matches!(result, Err(ConsulError::MissingEndpoint { .. })));
        // Endpoint is checked before any component is constructed
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    struct NoopHook;

    impl RequestHook for NoopHook {}

    #[test]
    fn test_timeouts_parsed_as_millis() {
        let spec = ClientSpec::with_url("http://localhost:8500").with_timeouts(
            TimeoutSpec::default()
                .with_connect("0")
                .with_read("1500")
                .with_write("30000"),
        );
        let settings = ClientFactory::default().prepare("c1", &spec).unwrap();
        assert_eq!(settings.connect_timeout(), Some(Duration::ZERO));
        assert_eq!(settings.read_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(settings.write_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_invalid_timeout() {
        let spec = ClientSpec::with_host("10.0.0.2", Some(8500))
            .with_timeouts(TimeoutSpec::default().with_connect("abc"));
        let err = ClientFactory::default().prepare("c2", &spec).unwrap_err();
        match err {
            ConsulError::InvalidNumber { client, field, value } => {
                assert_eq!(client, "c2");
                assert_eq!(field, "connect");
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error: {other}"),
        }

        for raw in ["-1", "1.5", ""] {
            let spec = ClientSpec::with_url("http://localhost:8500")
                .with_timeouts(TimeoutSpec::default().with_read(raw));
            assert!(matches!(
                ClientFactory::default().prepare("c", &spec),
                Err(ConsulError::InvalidNumber { field, .. }) if field == "read"
            ));
        }
    }

    #[test]
    fn test_acl_token_and_headers() {
        let spec = ClientSpec::with_url("http://localhost:8500")
            .with_acl_token("s3cr3t")
            .with_header("X-Team", "platform");
        let settings = ClientFactory::default().prepare("c1", &spec).unwrap();
        assert_eq!(settings.headers().get("x-consul-token").unwrap(), "s3cr3t");
        assert!(settings.headers().get(TOKEN_HEADER).unwrap().is_sensitive());
        assert_eq!(settings.headers().get("x-team").unwrap(), "platform");

        let empty_token = ClientSpec::with_url("http://localhost:8500").with_acl_token("");
        let settings = ClientFactory::default().prepare("c1", &empty_token).unwrap();
        assert!(settings.headers().get(TOKEN_HEADER).is_none());
    }

    #[test]
    fn test_invalid_header() {
        let spec = ClientSpec::with_url("http://localhost:8500").with_header("bad header", "x");
        assert!(matches!(
            ClientFactory::default().prepare("c1", &spec),
            Err(ConsulError::InvalidHeader { name, .. }) if name == "bad header"
        ));
    }

    #[test]
    fn test_basic_auth() {
        let spec = ClientSpec::with_url("http://localhost:8500").with_basic_auth("admin", "pw");
        assert!(ClientFactory::default().prepare("c1", &spec).unwrap().has_basic_auth());

        let spec = ClientSpec::with_url("http://localhost:8500").with_basic_auth("admin", "");
        assert!(!ClientFactory::default().prepare("c1", &spec).unwrap().has_basic_auth());
    }

    #[test]
    fn test_unknown_component_not_accessible() {
        let spec = ClientSpec::with_url("http://localhost:8500")
            .with_component(ComponentRole::HostnameVerifier, "does-not-exist");
        match factory_with_components().prepare("c1", &spec).unwrap_err() {
            ConsulError::ComponentNotAccessible { client, role, type_id } => {
                assert_eq!(client, "c1");
                assert_eq!(role, "hostnameVerifier");
                assert_eq!(type_id, "does-not-exist");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_failing_component_not_constructible() {
        let spec = ClientSpec::with_url("http://localhost:8500")
            .with_component(ComponentRole::Executor, "broken");
        match factory_with_components().prepare("c1", &spec).unwrap_err() {
            ConsulError::ComponentNotConstructible { role, type_id, reason, .. } => {
                assert_eq!(role, "executor");
                assert_eq!(type_id, "broken");
                assert_eq!(reason, "no runtime available");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_tls_component_switches_host_to_https() {
        let spec = ClientSpec::with_host("consul.internal", Some(8501))
            .with_component(ComponentRole::TlsContext, "corp-ca");
        let settings = factory_with_components().prepare("c1", &spec).unwrap();
        assert_eq!(settings.base_url(), "https://consul.internal:8501");
        assert!(settings.tls().is_some());
    }

    #[test]
    fn test_host_tls_used_when_client_has_none() {
        let host = HostEnvironment::new().with_tls(TlsContext::new());
        let factory = ClientFactory::new(ComponentRegistry::new(), host);
        let settings = factory
            .prepare("c1", &ClientSpec::with_host("consul.internal", None))
            .unwrap();
        assert_eq!(settings.base_url(), "https://consul.internal:8500");
    }

    #[test]
    fn test_proxy_precedence() {
        let spec = ClientSpec::with_url("http://localhost:8500")
            .with_component(ComponentRole::Proxy, "corp-proxy");

        let settings = factory_with_components().prepare("c1", &spec).unwrap();
        assert_eq!(settings.proxy_source(), ProxySource::Client);

        let mut components = ComponentRegistry::new();
        components.register_proxy("corp-proxy", || Ok(reqwest::Proxy::all("http://proxy.corp:3128")?));
        let host = HostEnvironment::new()
            .with_proxy(reqwest::Proxy::all("http://host-proxy:8080").unwrap());
        let settings = ClientFactory::new(components, host).prepare("c1", &spec).unwrap();
        assert_eq!(settings.proxy_source(), ProxySource::Host);

        let settings = ClientFactory::new(ComponentRegistry::new(), HostEnvironment::new())
            .prepare("c1", &ClientSpec::with_url("http://localhost:8500"))
            .unwrap();
        assert_eq!(settings.proxy_source(), ProxySource::Direct);
    }

    #[test]
    fn test_host_proxy_from_environment_variables() {
        let vars = |var: &str| match var {
            "HTTPS_PROXY" => Some(String::new()),
            "http_proxy" => Some("http://corp-proxy:3128".to_string()),
            _ => None,
        };
        assert!(HostEnvironment::from_lookup(vars).proxy.is_some());
        assert!(HostEnvironment::from_lookup(|_| None).proxy.is_none());
        assert!(HostEnvironment::from_lookup(|_| Some("http://[invalid".to_string())).proxy.is_none());
    }

    #[test]
    fn test_default_factory_uses_process_proxy() {
        std::env::set_var("HTTPS_PROXY", "http://corp-proxy:3128");
        let settings = ClientFactory::default().prepare("c1", &ClientSpec::with_url("http://localhost:8500"));
        std::env::remove_var("HTTPS_PROXY");

        assert_eq!(settings.unwrap().proxy_source(), ProxySource::Host);
    }

    #[tokio::test]
    async fn test_hostname_verifier_rejects_before_io() {
        let spec = ClientSpec::with_url("http://10.255.255.1:8500")
            .with_component(ComponentRole::HostnameVerifier, "deny-all");
        let err = factory_with_components().build("c1", &spec).await.unwrap_err();
        assert!(matches!(
            err,
            ConsulError::ClientCreationFailed { ref client, source: KvError::HostnameRejected(_) }
                if client == "c1"
        ));
    }

    #[tokio::test]
    async fn test_no_ping_connects_without_io() {
        let spec = ClientSpec::with_url("http://127.0.0.1:9").with_ping(false);
        let client = ClientFactory::default().build("c1", &spec).await.unwrap();
        assert_eq!(client.base_url().as_str(), "http://127.0.0.1:9/");
    }

    #[tokio::test]
    async fn test_malformed_url_is_creation_failure() {
        let spec = ClientSpec::with_url("not a url");
        let err = ClientFactory::default().build("c1", &spec).await.unwrap_err();
        assert!(matches!(
            err,
            ConsulError::ClientCreationFailed { source: KvError::InvalidUrl(_), .. }
        ));
    }
}
