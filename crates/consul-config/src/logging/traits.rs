//! Logger trait and structured events

use std::fmt;
use std::sync::Arc;

/// Lifecycle events reported by the client registry and the config provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsulEvent {
    /// A client was built and connected
    ClientBuilt { name: String, target: String },
    /// A client could not be built
    ClientRejected { name: String, reason: String },
    /// A client was closed on shutdown
    ClientClosed { name: String },
    /// Closing a client failed; shutdown continues with the remaining clients
    ClientCloseFailed { name: String, reason: String },
    /// A source could not be enumerated during a refresh
    SourceUnreachable { name: String, reason: String },
    /// No client is configured
    Disabled,
}

impl fmt::Display for ConsulEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientBuilt { name, target } => {
                write!(f, "Built Consul client {} for remote instance at {}", name, target)
            }
            Self::ClientRejected { name, reason } => {
                write!(f, "Unable to create Consul client {}: {}", name, reason)
            }
            Self::ClientClosed { name } => write!(f, "Closed Consul client {}", name),
            Self::ClientCloseFailed { name, reason } => {
                write!(f, "Unable to properly close Consul client {}: {}", name, reason)
            }
            Self::SourceUnreachable { name, reason } => {
                write!(f, "Consul source {} unreachable: {}", name, reason)
            }
            Self::Disabled => write!(f, "No Consul configured, Consul support disabled"),
        }
    }
}

/// Logger abstraction
///
/// Implementations:
/// - `NoOpLogger`: Silent logger for testing
/// - `TracingLogger`: Forwards to the `tracing` ecosystem
/// - Host adapters: anything implementing this trait
pub trait Logger: Send + Sync {
    /// Log a debug message
    fn debug(&self, message: &str);

    /// Log an info message
    fn info(&self, message: &str);

    /// Log a warning message
    fn warn(&self, message: &str);

    /// Log an error message
    fn error(&self, message: &str);

    /// Report a structured event
    ///
    /// The default implementation renders the event and logs it at a level
    /// matching its severity.
    fn event(&self, event: &ConsulEvent) {
        let message = event.to_string();
        match event {
            ConsulEvent::ClientBuilt { .. }
            | ConsulEvent::ClientClosed { .. }
            | ConsulEvent::Disabled => self.info(&message),
            ConsulEvent::SourceUnreachable { .. } => self.warn(&message),
            ConsulEvent::ClientRejected { .. } | ConsulEvent::ClientCloseFailed { .. } => {
                self.error(&message)
            }
        }
    }
}

/// Type alias for an Arc-wrapped logger
pub type SharedLogger = Arc<dyn Logger>;

/// Convenience macros for logging
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)*) => {
        $logger.debug(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)*) => {
        $logger.info(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)*) => {
        $logger.warn(&format!($($arg)*))
    };
}
