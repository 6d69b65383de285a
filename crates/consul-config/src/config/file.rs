//! YAML configuration file holding all named clients
//!
//! The document may either hold the client map directly or nest it under a
//! top-level `consul` key:
//!
//! ```yaml
//! consul:
//!   clients:
//!     consul1:
//!       url: http://127.0.0.1:8500
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::spec::ClientSpec;
use crate::error::{ConsulError, ConsulResult};

/// All configured Consul clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsulConfig {
    /// Named clients; an empty map disables Consul support
    #[serde(default)]
    pub clients: BTreeMap<String, ClientSpec>,

    /// Abort start-up on the first client that cannot be built
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,
}

fn default_fail_fast() -> bool {
    true
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            clients: BTreeMap::new(),
            fail_fast: true,
        }
    }
}

impl ConsulConfig {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named client
    pub fn with_client(mut self, name: impl Into<String>, spec: ClientSpec) -> Self {
        self.clients.insert(name.into(), spec);
        self
    }

    /// Keep going when a client cannot be built
    pub fn degraded(mut self) -> Self {
        self.fail_fast = false;
        self
    }

    /// Whether any client is configured
    pub fn is_enabled(&self) -> bool {
        !self.clients.is_empty()
    }

    /// Parse a YAML document
    pub fn from_yaml_str(content: &str) -> ConsulResult<Self> {
        let document: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| ConsulError::Config(format!("Failed to parse YAML: {}", e)))?;

        let section = match document {
            serde_yaml::Value::Null => return Ok(Self::default()),
            serde_yaml::Value::Mapping(mut map) => match map.remove("consul") {
                Some(section) => section,
                None => serde_yaml::Value::Mapping(map),
            },
            other => other,
        };

        serde_yaml::from_value(section)
            .map_err(|e| ConsulError::Config(format!("Invalid Consul configuration: {}", e)))
    }

    /// Load from a file; a missing file yields an empty configuration
    pub fn load(path: impl AsRef<Path>) -> ConsulResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Default user-level location (~/.config/consul/config.yaml on Linux)
    pub fn user_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".config"));
        config_dir.join("consul").join("config.yaml")
    }

    /// Load from the default user-level location
    pub fn load_user() -> ConsulResult<Self> {
        Self::load(Self::user_path())
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> ConsulResult<String> {
        serde_yaml::to_string(self)
            .map_err(|e| ConsulError::Config(format!("Failed to serialize YAML: {}", e)))
    }
}
