//! Configuration for relay clients and servers.
//!
//! Mirrors the options the connection layer accepts at runtime: reconnect
//! backoff, client start options, server start options and logging. The
//! whole tree can be persisted as TOML; every field has a serde default so
//! partial files load cleanly.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{RelayError, RelayResult};

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Reconnect backoff settings.
    #[serde(default)]
    pub reconnect: ReconnectSettings,

    /// Client start options.
    #[serde(default)]
    pub client: ClientSettings,

    /// Server start options.
    #[serde(default)]
    pub server: ServerSettings,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Multiplier applied to the delay after every attempt.
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// `[floor, ceiling]` of the reconnect delay, in milliseconds.
    #[serde(default = "default_delay")]
    pub delay: [u64; 2],
}

/// Client start options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Server URL; a scheme is added on start when missing.
    #[serde(default)]
    pub url: String,

    /// Prefix for lines written through the injected log sink.
    #[serde(default = "default_logging_context")]
    pub logging_context: String,

    /// Scheme used when `url` carries none.
    #[serde(default = "default_scheme")]
    pub default_scheme: String,
}

/// Server start options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Reserved per-message bundling policy. Stored, not acted upon.
    #[serde(default)]
    pub bundling: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. Empty means console only.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

fn default_factor() -> f64 {
    f64::from(constants::DEFAULT_RECONNECT_FACTOR)
}

fn default_delay() -> [u64; 2] {
    [
        constants::DEFAULT_RECONNECT_FLOOR_MS,
        constants::DEFAULT_RECONNECT_CEILING_MS,
    ]
}

fn default_logging_context() -> String {
    constants::DEFAULT_LOGGING_CONTEXT.to_string()
}

fn default_scheme() -> String {
    constants::DEFAULT_URL_SCHEME.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            factor: default_factor(),
            delay: default_delay(),
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            logging_context: default_logging_context(),
            default_scheme: default_scheme(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl ReconnectSettings {
    /// Check that the backoff can make progress and stays bounded.
    pub fn validate(&self) -> RelayResult<()> {
        let [floor, ceiling] = self.delay;
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(RelayError::Config(format!(
                "reconnect factor must be >= 1, got {}",
                self.factor
            )));
        }
        if floor == 0 {
            return Err(RelayError::Config("reconnect delay floor must be > 0".into()));
        }
        if floor > ceiling {
            return Err(RelayError::Config(format!(
                "reconnect delay floor ({floor}ms) exceeds ceiling ({ceiling}ms)"
            )));
        }
        Ok(())
    }
}

impl RelayConfig {
    /// Parse configuration from a TOML string and validate it.
    pub fn from_toml_str(contents: &str) -> RelayResult<Self> {
        let config: RelayConfig = toml::from_str(contents)?;
        config.reconnect.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> RelayResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> RelayResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RelayError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Normalize a server URL.
///
/// Trims surrounding whitespace and prepends `{default_scheme}://` when no
/// scheme is present. Everything else is kept as given.
pub fn normalize_url(url: &str, default_scheme: &str) -> String {
    let trimmed = url.trim();
    if trimmed.is_empty() || trimmed.contains("://") {
        return trimmed.to_string();
    }

    let scheme = default_scheme.trim_end_matches("://").trim_end_matches(':');
    format!("{scheme}://{trimmed}")
}
