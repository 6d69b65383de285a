//! Configuration tree built from KV stores
//!
//! - `ConfigNode`: nested configuration values
//! - `ConfigurationProvider`: what the host's merge engine consumes
//! - `ConsulConfigProvider`: flattens every registered store into one tree

mod node;
mod provider;

pub use node::{translate_key, ConfigNode};
pub use provider::{ConfigurationProvider, ConsulConfigProvider, CONFIG_ROOT};
