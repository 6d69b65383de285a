//! HTTP client for the Consul v1 API
//!
//! Only the endpoints needed for enumerate-and-fetch are used:
//! - `GET /v1/kv/<prefix>?keys` lists keys (404 when there are none)
//! - `GET /v1/kv/<key>?raw` reads a value (404 when it does not exist)
//! - `GET /v1/status/leader` checks the agent is alive

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tokio::runtime::Handle;

use super::components::{RequestHook, RequestInfo, RequestOutcome};
use super::traits::{KvError, KvResult, KvStore};

/// Header carrying the ACL token
pub(crate) const TOKEN_HEADER: &str = "x-consul-token";

struct Reply {
    status: StatusCode,
    body: String,
}

/// Connected Consul client
///
/// Built by [`ClientFactory`](super::ClientFactory). Settings such as
/// timeouts, TLS, proxy and default headers live in the wrapped
/// `reqwest::Client`.
pub struct ConsulClient {
    name: String,
    base_url: Url,
    http: reqwest::Client,
    basic_auth: Option<(String, String)>,
    executor: Option<Handle>,
    hook: Option<Arc<dyn RequestHook>>,
    closed: AtomicBool,
}

impl ConsulClient {
    pub(crate) fn new(
        name: impl Into<String>,
        base_url: Url,
        http: reqwest::Client,
        basic_auth: Option<(String, String)>,
        executor: Option<Handle>,
        hook: Option<Arc<dyn RequestHook>>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url,
            http,
            basic_auth,
            executor,
            hook,
            closed: AtomicBool::new(false),
        }
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Check the agent answers and has a leader
    pub async fn ping(&self) -> KvResult<()> {
        let url = self.api_url(&["status", "leader"], None)?;
        let reply = self.get(url.clone()).await?;
        if reply.status.is_success() {
            Ok(())
        } else {
            Err(KvError::Status {
                status: reply.status.as_u16(),
                url: url.to_string(),
            })
        }
    }

    fn api_url(&self, path: &[&str], query: Option<&str>) -> KvResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| KvError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("v1")
            .extend(path);
        url.set_query(query);
        Ok(url)
    }

    /// `/v1/kv/<key>`, keeping the key's own `/` hierarchy
    fn kv_url(&self, key: &str, query: &str) -> KvResult<Url> {
        let mut path = vec!["kv"];
        path.extend(key.split('/'));
        self.api_url(&path, Some(query))
    }

    fn ensure_open(&self) -> KvResult<()> {
        if self.is_closed() {
            Err(KvError::Closed)
        } else {
            Ok(())
        }
    }

    async fn get(&self, url: Url) -> KvResult<Reply> {
        let info = RequestInfo {
            client: self.name.clone(),
            method: "GET".to_string(),
            url: url.to_string(),
        };
        if let Some(hook) = &self.hook {
            hook.before(&info);
        }

        let mut request = self.http.get(url);
        if let Some((user, password)) = &self.basic_auth {
            request = request.basic_auth(user, Some(password));
        }
        let exchange = async move {
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, KvError>(Reply { status, body })
        };

        let result = match &self.executor {
            Some(executor) => executor
                .spawn(exchange)
                .await
                .map_err(|e| KvError::Executor(e.to_string()))
                .and_then(|inner| inner),
            None => exchange.await,
        };

        if let Some(hook) = &self.hook {
            let outcome = match &result {
                Ok(reply) => RequestOutcome::Status(reply.status.as_u16()),
                Err(e) => RequestOutcome::Failed(e.to_string()),
            };
            hook.after(&info, &outcome);
        }
        result
    }
}

#[async_trait]
impl KvStore for ConsulClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn target(&self) -> String {
        self.base_url.to_string()
    }

    async fn list_keys(&self, prefix: &str) -> KvResult<Vec<String>> {
        self.ensure_open()?;
        let url = self.kv_url(prefix, "keys")?;
        let reply = self.get(url.clone()).await?;
        match reply.status {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => Ok(serde_json::from_str(&reply.body)?),
            status => Err(KvError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }

    async fn get_value(&self, key: &str) -> KvResult<Option<String>> {
        self.ensure_open()?;
        let url = self.kv_url(key, "raw")?;
        let reply = self.get(url.clone()).await?;
        match reply.status {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(reply.body)),
            status => Err(KvError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }

    async fn close(&self) -> KvResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(KvError::Closed);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConsulClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsulClient")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("basic_auth", &self.basic_auth.is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}
