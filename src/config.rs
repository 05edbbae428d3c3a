//! Service configuration module.
//!
//! Handles loading, validating, and merging `imgforge.toml`. Configuration is
//! layered: stock defaults are overridden by the user's config file, which is
//! in turn overridden by command-line flags and the `PORT` environment
//! variable (see `main.rs`).
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [server]
//! host = "0.0.0.0"                 # Interface to bind
//! port = 3001                      # TCP port
//!
//! [uploads]
//! max_file_size = 5242880          # Per-file limit in bytes (5 MiB)
//!
//! [cors]
//! allowed_origin = "http://localhost:3000"  # Empty string disables CORS headers
//!
//! [logging]
//! filter = "info"                  # tracing EnvFilter directive; RUST_LOG wins
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse; override just the values you want:
//!
//! ```toml
//! [server]
//! port = 8080
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Default per-file upload limit: 5 MiB.
pub const DEFAULT_MAX_FILE_SIZE: usize = 5 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Service configuration loaded from a TOML file.
///
/// All fields have defaults. User config files need only specify the values
/// they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Listener address.
    pub server: ServerConfig,
    /// Multipart upload limits.
    pub uploads: UploadsConfig,
    /// Cross-origin policy for the browser client.
    pub cors: CorsConfig,
    /// Log filtering.
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "server.host must not be empty".into(),
            ));
        }
        if self.uploads.max_file_size == 0 {
            return Err(ConfigError::Validation(
                "uploads.max_file_size must be greater than 0".into(),
            ));
        }
        let origin = &self.cors.allowed_origin;
        if !origin.is_empty() && !(origin.starts_with("http://") || origin.starts_with("https://"))
        {
            return Err(ConfigError::Validation(format!(
                "cors.allowed_origin must be an http(s) origin or empty, got '{origin}'"
            )));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::Validation(
                "logging.filter must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadsConfig {
    /// Maximum size of a single uploaded file, in bytes.
    pub max_file_size: usize,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Value for `Access-Control-Allow-Origin`. Empty disables CORS.
    pub allowed_origin: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origin: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(ServiceConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ServiceConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ServiceConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from an optional file path.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result. An explicitly named file must exist.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = match path {
        Some(path) => Some(load_raw_config(path)?.ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file not found: {}", path.display()),
            ))
        })?),
        None => None,
    };
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock config file with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# imgforge Configuration
# ======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Precedence: stock defaults < this file < PORT env var < CLI flags.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# HTTP listener
# ---------------------------------------------------------------------------
[server]
# Interface to bind. Use "127.0.0.1" to accept local connections only.
host = "0.0.0.0"
# TCP port. Overridden by the PORT environment variable and --port.
port = 3001

# ---------------------------------------------------------------------------
# Uploads
# ---------------------------------------------------------------------------
[uploads]
# Maximum size of one uploaded file in bytes. Larger files are rejected
# with 400 "File upload error: File too large" before any processing.
max_file_size = 5242880

# ---------------------------------------------------------------------------
# CORS
# ---------------------------------------------------------------------------
[cors]
# Origin allowed to call the API from a browser. Only POST is allowed.
# Set to "" to send no CORS headers at all.
allowed_origin = "http://localhost:3000"

# ---------------------------------------------------------------------------
# Logging
# ---------------------------------------------------------------------------
[logging]
# tracing-subscriber EnvFilter directive, e.g. "info" or "imgforge=debug".
# The RUST_LOG environment variable takes precedence when set.
filter = "info"
"##
}
