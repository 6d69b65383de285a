//! Error types for client construction and configuration refresh

use thiserror::Error;

use crate::client::KvError;

/// Errors raised while building clients or providing configuration
///
/// Every construction error carries the name of the client it belongs to so a
/// misconfigured client can be diagnosed without affecting the others.
#[derive(Error, Debug)]
pub enum ConsulError {
    /// Neither a URL nor a host was configured
    #[error("Consul client {client}: no URL or host specified")]
    MissingEndpoint { client: String },

    /// A timeout value is not a non-negative integer
    #[error("Consul client {client}: invalid number for {field}: {value:?}")]
    InvalidNumber {
        client: String,
        field: String,
        value: String,
    },

    /// A pluggable component factory failed
    #[error("Consul client {client}: cannot construct {role} component {type_id:?}: {reason}")]
    ComponentNotConstructible {
        client: String,
        role: String,
        type_id: String,
        reason: String,
    },

    /// A pluggable component is not known to the component registry
    #[error("Consul client {client}: {role} component {type_id:?} is not accessible")]
    ComponentNotAccessible {
        client: String,
        role: String,
        type_id: String,
    },

    /// A custom header cannot be carried over HTTP
    #[error("Consul client {client}: invalid header {name:?}")]
    InvalidHeader { client: String, name: String },

    /// The final connect step failed
    #[error("Consul client {client}: cannot create client: {source}")]
    ClientCreationFailed {
        client: String,
        #[source]
        source: KvError,
    },

    /// A store's key space could not be enumerated during a refresh
    #[error("Consul source {client} unavailable: {source}")]
    SourceUnavailable {
        client: String,
        #[source]
        source: KvError,
    },

    /// Several clients failed during a fail-fast start-up, ordered by client name
    #[error("{} Consul clients failed: {}", .failures.len(), join_messages(.failures))]
    ClientsFailed { failures: Vec<ConsulError> },

    /// `add_sources` was called without any source
    #[error("No Consul sources given")]
    NullSources,

    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConsulError {
    /// Create a missing endpoint error
    pub fn missing_endpoint(client: impl Into<String>) -> Self {
        Self::MissingEndpoint {
            client: client.into(),
        }
    }

    /// Create an invalid number error
    pub fn invalid_number(
        client: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::InvalidNumber {
            client: client.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a client creation error
    pub fn creation_failed(client: impl Into<String>, source: KvError) -> Self {
        Self::ClientCreationFailed {
            client: client.into(),
            source,
        }
    }

    /// Create a source unavailable error
    pub fn source_unavailable(client: impl Into<String>, source: KvError) -> Self {
        Self::SourceUnavailable {
            client: client.into(),
            source,
        }
    }

    /// Fold start-up failures into one error
    ///
    /// A single failure is returned as is.
    pub fn aggregate(mut failures: Vec<ConsulError>) -> Self {
        if failures.len() == 1 {
            failures.remove(0)
        } else {
            Self::ClientsFailed { failures }
        }
    }

    /// Names of every client this error is about
    pub fn clients(&self) -> Vec<&str> {
        match self {
            Self::ClientsFailed { failures } => failures.iter().flat_map(|e| e.clients()).collect(),
            other => other.client().into_iter().collect(),
        }
    }

    /// Name of the client this error is about, if any
    pub fn client(&self) -> Option<&str> {
        match self {
            Self::MissingEndpoint { client }
            | Self::InvalidNumber { client, .. }
            | Self::ComponentNotConstructible { client, .. }
            | Self::ComponentNotAccessible { client, .. }
            | Self::InvalidHeader { client, .. }
            | Self::ClientCreationFailed { client, .. }
            | Self::SourceUnavailable { client, .. } => Some(client),
            Self::ClientsFailed { .. } | Self::NullSources | Self::Config(_) | Self::Io(_) => None,
        }
    }
}

fn join_messages(failures: &[ConsulError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type ConsulResult<T> = Result<T, ConsulError>;
