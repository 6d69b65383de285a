//! Consul clients
//!
//! - `KvStore`: the capability the configuration provider consumes
//! - `ConsulClient`: HTTP client for the Consul v1 KV API
//! - `MemoryKvStore`: in-memory store for tests and local overrides
//! - `ClientFactory`: turns a `ClientSpec` into a connected client
//! - `ClientRegistry`: named clients built at start-up, closed at shutdown

mod traits;
mod components;
mod http;
mod memory;
mod factory;
mod registry;

pub use traits::{ClientHandle, KvError, KvResult, KvStore};
pub use components::{
    BoxError, ComponentError, ComponentFactory, ComponentRegistry, ComponentRole, HostnameVerifier,
    RequestHook, RequestInfo, RequestOutcome, TlsContext,
};
pub use http::ConsulClient;
pub use memory::MemoryKvStore;
pub use factory::{ClientFactory, ConnectionSettings, HostEnvironment, ProxySource};
pub use registry::{ClientRegistry, RegistryBuild};
