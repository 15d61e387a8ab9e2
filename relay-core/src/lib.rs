//! Relay Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by the connection crate:
//! - Configuration for reconnect backoff, client and server start options
//! - Error types, including the payload decode taxonomy
//! - Structured logging with tracing, plus the injectable log sink
//! - Protocol constants and lifecycle event names

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;

// Re-export commonly used items at the crate root
pub use config::RelayConfig;
pub use error::{DecodeError, RelayError, RelayResult};
pub use logging::{init_logging, LogSink, NoopLog, TracingLog};
