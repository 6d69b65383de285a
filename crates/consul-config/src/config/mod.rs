//! Declarative client configuration
//!
//! - `ClientSpec`: one named client, as written in the configuration file
//! - `ConsulConfig`: all named clients, loadable from YAML

mod spec;
mod file;

pub use spec::{ClientSpec, ComponentRefs, Endpoint, TimeoutSpec, DEFAULT_PORT};
pub use file::ConsulConfig;
