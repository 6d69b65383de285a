//! Per-client configuration record

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::client::ComponentRole;
use crate::error::{ConsulError, ConsulResult};

/// Port used when a host is given without one
pub const DEFAULT_PORT: u16 = 8500;

/// Declared configuration of one named Consul client
///
/// The record is plain data; it is validated by
/// [`ClientFactory::prepare`](crate::client::ClientFactory::prepare).
///
/// # Example
///
/// ```
/// use consul_config::config::{ClientSpec, TimeoutSpec};
///
/// let spec = ClientSpec::with_url("http://10.0.0.1:8500")
///     .with_acl_token("secret")
///     .with_timeouts(TimeoutSpec::default().with_read("2000"))
///     .with_header("X-Team", "platform");
/// assert_eq!(spec.url.as_deref(), Some("http://10.0.0.1:8500"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSpec {
    /// Full URL of the agent; takes precedence over `host`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Host name or address, optionally with an embedded `:port`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Port for `host`; wins over a port embedded in `host`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// ACL token sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl_token: Option<String>,
    /// Check the agent is alive when connecting
    #[serde(default = "default_ping")]
    pub ping: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub timeouts: TimeoutSpec,
    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Pluggable component type identifiers
    #[serde(default)]
    pub components: ComponentRefs,
}

fn default_ping() -> bool {
    true
}

impl Default for ClientSpec {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: None,
            acl_token: None,
            ping: true,
            user: None,
            password: None,
            timeouts: TimeoutSpec::default(),
            headers: BTreeMap::new(),
            components: ComponentRefs::default(),
        }
    }
}

impl ClientSpec {
    /// Create a spec targeting a URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Create a spec targeting a host, with the default port unless `port` is given
    pub fn with_host(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: Some(host.into()),
            port,
            ..Self::default()
        }
    }

    /// Set the ACL token
    pub fn with_acl_token(mut self, token: impl Into<String>) -> Self {
        self.acl_token = Some(token.into());
        self
    }

    /// Enable or disable the liveness check on connect
    pub fn with_ping(mut self, ping: bool) -> Self {
        self.ping = ping;
        self
    }

    /// Set basic-auth credentials
    pub fn with_basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Set the timeouts
    pub fn with_timeouts(mut self, timeouts: TimeoutSpec) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Add a custom header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Reference a pluggable component by type identifier
    pub fn with_component(mut self, role: ComponentRole, type_id: impl Into<String>) -> Self {
        let type_id = Some(type_id.into());
        match role {
            ComponentRole::HostnameVerifier => self.components.hostname_verifier = type_id,
            ComponentRole::TlsContext => self.components.tls_context = type_id,
            ComponentRole::Executor => self.components.executor = type_id,
            ComponentRole::Proxy => self.components.proxy = type_id,
            ComponentRole::RequestHook => self.components.request_hook = type_id,
        }
        self
    }

    /// Resolve the endpoint this client targets
    ///
    /// A non-empty `url` always wins; otherwise `host` is combined with the
    /// configured or default port.
    pub fn endpoint(&self, name: &str) -> ConsulResult<Endpoint> {
        if let Some(url) = non_empty(&self.url) {
            return Ok(Endpoint::Url(url.to_string()));
        }
        match non_empty(&self.host) {
            Some(host) => {
                let (host, embedded) = split_host_port(host);
                Ok(Endpoint::HostPort {
                    host: host.to_string(),
                    port: self.port.or(embedded).unwrap_or(DEFAULT_PORT),
                })
            }
            None => Err(ConsulError::missing_endpoint(name)),
        }
    }

    /// Basic-auth credentials, when both parts are non-empty
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        match (non_empty(&self.user), non_empty(&self.password)) {
            (Some(user), Some(password)) => Some((user, password)),
            _ => None,
        }
    }

    /// ACL token, when non-empty
    pub fn acl_token(&self) -> Option<&str> {
        non_empty(&self.acl_token)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Split `host:port`, leaving bare IPv6 addresses intact
fn split_host_port(raw: &str) -> (&str, Option<u16>) {
    if let Some(rest) = raw.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (host, port);
        }
        return (raw, None);
    }
    match raw.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (raw, None),
        },
        _ => (raw, None),
    }
}

/// Target of a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Url(String),
    HostPort { host: String, port: u16 },
}

impl Endpoint {
    /// Base URL for requests; host endpoints use `https` when `secure`
    pub fn base_url(&self, secure: bool) -> String {
        match self {
            Endpoint::Url(url) => url.clone(),
            Endpoint::HostPort { .. } => {
                let scheme = if secure { "https" } else { "http" };
                format!("{}://{}", scheme, self)
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Url(url) => f.write_str(url),
            Endpoint::HostPort { host, port } if host.contains(':') => {
                write!(f, "[{}]:{}", host, port)
            }
            Endpoint::HostPort { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}

/// Raw timeout values in milliseconds, parsed when the client is built
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSpec {
    #[serde(default, deserialize_with = "raw_number", skip_serializing_if = "Option::is_none")]
    pub connect: Option<String>,
    #[serde(default, deserialize_with = "raw_number", skip_serializing_if = "Option::is_none")]
    pub read: Option<String>,
    #[serde(default, deserialize_with = "raw_number", skip_serializing_if = "Option::is_none")]
    pub write: Option<String>,
}

impl TimeoutSpec {
    pub fn with_connect(mut self, millis: impl Into<String>) -> Self {
        self.connect = Some(millis.into());
        self
    }

    pub fn with_read(mut self, millis: impl Into<String>) -> Self {
        self.read = Some(millis.into());
        self
    }

    pub fn with_write(mut self, millis: impl Into<String>) -> Self {
        self.write = Some(millis.into());
        self
    }
}

/// Keep YAML numbers as their text so parsing happens in one place
fn raw_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Int(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
        Raw::Text(s) => s,
    }))
}

/// Type identifiers of pluggable components, resolved through a
/// [`ComponentRegistry`](crate::client::ComponentRegistry)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname_verifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, alias = "bookend", skip_serializing_if = "Option::is_none")]
    pub request_hook: Option<String>,
}
