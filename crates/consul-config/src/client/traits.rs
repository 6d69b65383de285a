//! KV store capability

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from a KV store
#[derive(Error, Debug)]
pub enum KvError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { status: u16, url: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Hostname rejected: {0}")]
    HostnameRejected(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Store unreachable: {0}")]
    Unreachable(String),

    #[error("Client is closed")]
    Closed,
}

pub type KvResult<T> = Result<T, KvError>;

/// A connected KV store
///
/// Only flat enumerate-and-fetch is required: list the keys under a prefix,
/// then read each value.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Name the store was registered under
    fn name(&self) -> &str;

    /// Human-readable target, used in log events
    fn target(&self) -> String;

    /// List all keys under `prefix`; an empty prefix lists the whole key space
    async fn list_keys(&self, prefix: &str) -> KvResult<Vec<String>>;

    /// Read a value; `None` when the key does not exist
    async fn get_value(&self, key: &str) -> KvResult<Option<String>>;

    /// Release the store; later calls fail with [`KvError::Closed`]
    async fn close(&self) -> KvResult<()>;
}

/// Shared handle to a connected store
pub type ClientHandle = Arc<dyn KvStore>;
