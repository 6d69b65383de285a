//! Logging abstractions for backend-agnostic, structured logging
//!
//! The crate never talks to a logging backend directly. Components receive a
//! [`SharedLogger`] and report [`ConsulEvent`]s through it; the host decides
//! where they end up.

mod traits;
mod noop;
mod tracing_logger;

pub use traits::{ConsulEvent, Logger, SharedLogger};
pub use noop::NoOpLogger;
pub use tracing_logger::TracingLogger;
