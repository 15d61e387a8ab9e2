//! Structured logging setup and the injectable log sink.
//!
//! Process-wide output goes through the `tracing` ecosystem. Connections
//! additionally accept a [`LogSink`] at start time so applications can route
//! connection diagnostics wherever they like; the default sink discards them.

use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{RelayError, RelayResult};

/// Destination for connection diagnostics.
///
/// `context` is the label configured on the connection (for example
/// `"Connection"`), so one sink can serve several connections.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, context: &str, message: &str);
}

/// Sink that discards everything. The default for every connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLog;

impl LogSink for NoopLog {
    fn log(&self, _level: Level, _context: &str, _message: &str) {}
}

/// Sink that forwards to `tracing` under the `relay::connection` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl LogSink for TracingLog {
    fn log(&self, level: Level, context: &str, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "relay::connection", "{context} :: {message}"),
            Level::WARN => tracing::warn!(target: "relay::connection", "{context} :: {message}"),
            Level::INFO => tracing::info!(target: "relay::connection", "{context} :: {message}"),
            Level::DEBUG => tracing::debug!(target: "relay::connection", "{context} :: {message}"),
            _ => tracing::trace!(target: "relay::connection", "{context} :: {message}"),
        }
    }
}

/// Shared handle to the no-op sink.
pub fn noop_sink() -> Arc<dyn LogSink> {
    Arc::new(NoopLog)
}

/// Install the global subscriber: compact console output on stderr plus a
/// daily-rotated `relay.log` in `log_dir`, plain or JSON.
///
/// `level` is an `EnvFilter` directive such as `"debug"` or
/// `"relay_socket=trace,info"`; an unparsable directive falls back to info.
/// Fails if a global subscriber is already installed.
pub fn init_logging(level: &str, log_dir: &Path, json_output: bool) -> RelayResult<LogGuard> {
    std::fs::create_dir_all(log_dir)?;

    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, "relay.log"));

    let json_file = json_output.then(|| {
        fmt::layer()
            .with_writer(writer.clone())
            .json()
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });
    let plain_file = (!json_output).then(|| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_file(true)
            .with_line_number(true)
    });

    tracing_subscriber::registry()
        .with(filter(level))
        .with(fmt::layer().with_target(true).compact())
        .with(json_file)
        .with(plain_file)
        .try_init()
        .map_err(|e| RelayError::Config(format!("logging already initialized: {e}")))?;

    tracing::info!("logging initialized at level={level}, dir={}", log_dir.display());

    Ok(LogGuard { _guard: Some(guard) })
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging from a [`LoggingConfig`].
///
/// An empty `directory` selects console-only output.
pub fn init_from_config(config: &LoggingConfig) -> RelayResult<LogGuard> {
    if config.directory.is_empty() {
        init_console_logging(&config.level);
        return Ok(LogGuard { _guard: None });
    }
    init_logging(&config.level, Path::new(&config.directory), config.json_output)
}

/// Keeps the non-blocking file writer alive; dropping it flushes the log.
pub struct LogGuard {
    _guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize a minimal console-only logger for testing or simple usage.
pub fn init_console_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(filter(level))
        .with(fmt::layer().with_target(true).compact())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_logging_does_not_panic() {
        // Subsequent calls are no-ops.
        init_console_logging("debug");
        init_console_logging("debug");
    }

    #[test]
    fn test_sinks_accept_every_level() {
        let sinks: [Arc<dyn LogSink>; 2] = [noop_sink(), Arc::new(TracingLog)];
        for sink in sinks {
            for level in [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE] {
                sink.log(level, "Connection", "probe");
            }
        }
    }

    #[test]
    fn test_init_logging_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        // May fail if another test installed the global subscriber first.
        let _ = init_logging("info", &log_dir, true);
        assert!(log_dir.is_dir());
    }

    #[test]
    fn test_console_only_config() {
        let config = LoggingConfig::default();
        assert!(init_from_config(&config).is_ok());
    }
}
