//! Logger backed by the `tracing` crate

use super::traits::{ConsulEvent, Logger};

/// Forwards messages and events to `tracing`
///
/// Events are emitted with structured fields (`client`, `target`, `reason`)
/// so subscribers can filter on them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl TracingLogger {
    pub fn new() -> Self {
        Self
    }
}

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!("{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }

    fn event(&self, event: &ConsulEvent) {
        match event {
            ConsulEvent::ClientBuilt { name, target } => {
                tracing::info!(client = %name, target = %target, "Consul client built");
            }
            ConsulEvent::ClientRejected { name, reason } => {
                tracing::error!(client = %name, reason = %reason, "Consul client rejected");
            }
            ConsulEvent::ClientClosed { name } => {
                tracing::info!(client = %name, "Consul client closed");
            }
            ConsulEvent::ClientCloseFailed { name, reason } => {
                tracing::error!(client = %name, reason = %reason, "Unable to properly close Consul client");
            }
            ConsulEvent::SourceUnreachable { name, reason } => {
                tracing::warn!(client = %name, reason = %reason, "Consul source unreachable");
            }
            ConsulEvent::Disabled => {
                tracing::info!("No Consul configured, Consul support disabled");
            }
        }
    }
}
