//! TOML Configuration File Support
//!
//! Configuration lives in `~/.config/pulse/pulse.toml` (XDG config dir).
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments (applied by the daemon)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [streams]
//! tick_interval_ms = 1000
//! simple_delay_ms = 500
//! stage_delay_ms = 300
//! max_concurrent_streams = 1024
//! emitter_capacity = 64
//! emitter_timeout_ms = 300000
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::streaming::StreamManagerConfig;

/// Default listen address of the daemon
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[server]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Listen address, e.g. `127.0.0.1:8080`
    pub bind: Option<String>,
}

/// `[streams]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamsToml {
    /// Interval between cancelable ticks
    pub tick_interval_ms: Option<u64>,
    /// Delay before each simple stream value
    pub simple_delay_ms: Option<u64>,
    /// Delay before each multi-stage value
    pub stage_delay_ms: Option<u64>,
    /// Maximum live cancelable streams
    pub max_concurrent_streams: Option<usize>,
    /// Messages buffered per connection
    pub emitter_capacity: Option<usize>,
    /// Response timeout; 0 disables it
    pub emitter_timeout_ms: Option<u64>,
}

/// Root of the TOML file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseToml {
    /// Server settings
    pub server: ServerToml,
    /// Stream settings
    pub streams: StreamsToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Fully resolved configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PulseConfig {
    /// Address the daemon listens on
    pub bind: SocketAddr,
    /// Stream manager settings
    pub streams: StreamManagerConfig,
    /// The file the configuration was loaded from, if any
    pub config_file_path: Option<PathBuf>,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            streams: StreamManagerConfig::default(),
            config_file_path: None,
        }
    }
}

impl PulseConfig {
    /// Check values the stream manager cannot work with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let streams = &self.streams;
        if streams.tick_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "tick_interval_ms must be greater than 0".into(),
            ));
        }
        if streams.max_concurrent_streams == 0 {
            return Err(ConfigError::ValidationError(
                "max_concurrent_streams must be greater than 0".into(),
            ));
        }
        if streams.emitter_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "emitter_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Get the default configuration file path
///
/// Returns `None` when the platform has no config directory.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pulse").join("pulse.toml"))
}

/// Load configuration from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if a
/// value is invalid. A missing config file is not an error.
pub fn load_config() -> Result<PulseConfig, ConfigError> {
    load_config_from_path(default_config_path().as_deref())
}

/// Load configuration from a specific path, then the environment
///
/// A `None` path or a path that does not exist yields defaults plus
/// environment overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if a value is
/// invalid.
pub fn load_config_from_path(path: Option<&Path>) -> Result<PulseConfig, ConfigError> {
    let mut config = PulseConfig::default();

    if let Some(config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.to_path_buf(),
                    source: e,
                })?;

            let toml_config: PulseToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.to_path_buf());

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(path = %config_path.display(), "Config file not found, using defaults");
        }
    }

    apply_env_config(&mut config)?;
    config.validate()?;

    Ok(config)
}

/// Apply TOML values on top of `config`
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] for an unparsable bind address.
pub fn apply_toml_config(config: &mut PulseConfig, toml: &PulseToml) -> Result<(), ConfigError> {
    if let Some(ref bind) = toml.server.bind {
        config.bind = parse_bind(bind)?;
    }

    let streams = &mut config.streams;
    if let Some(ms) = toml.streams.tick_interval_ms {
        streams.tick_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.streams.simple_delay_ms {
        streams.simple_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.streams.stage_delay_ms {
        streams.stage_delay = Duration::from_millis(ms);
    }
    if let Some(max) = toml.streams.max_concurrent_streams {
        streams.max_concurrent_streams = max;
    }
    if let Some(capacity) = toml.streams.emitter_capacity {
        streams.emitter_capacity = capacity;
    }
    if let Some(ms) = toml.streams.emitter_timeout_ms {
        streams.emitter_timeout = timeout_from_millis(ms);
    }
    Ok(())
}

/// Apply `PULSE_*` environment variables on top of `config`
///
/// Environment variables:
/// - `PULSE_BIND`: listen address
/// - `PULSE_TICK_INTERVAL_MS`: cancelable tick interval
/// - `PULSE_SIMPLE_DELAY_MS`: simple stream delay
/// - `PULSE_STAGE_DELAY_MS`: multi-stage delay
/// - `PULSE_MAX_STREAMS`: maximum live cancelable streams
/// - `PULSE_EMITTER_TIMEOUT_MS`: response timeout (0 disables)
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] for a value that does not parse.
pub fn apply_env_config(config: &mut PulseConfig) -> Result<(), ConfigError> {
    apply_env_from(config, |key| std::env::var(key).ok())
}

fn apply_env_from<F>(config: &mut PulseConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(bind) = lookup("PULSE_BIND") {
        config.bind = parse_bind(&bind)?;
    }
    if let Some(ms) = parse_env::<u64>(&lookup, "PULSE_TICK_INTERVAL_MS")? {
        config.streams.tick_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = parse_env::<u64>(&lookup, "PULSE_SIMPLE_DELAY_MS")? {
        config.streams.simple_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = parse_env::<u64>(&lookup, "PULSE_STAGE_DELAY_MS")? {
        config.streams.stage_delay = Duration::from_millis(ms);
    }
    if let Some(max) = parse_env::<usize>(&lookup, "PULSE_MAX_STREAMS")? {
        config.streams.max_concurrent_streams = max;
    }
    if let Some(ms) = parse_env::<u64>(&lookup, "PULSE_EMITTER_TIMEOUT_MS")? {
        config.streams.emitter_timeout = timeout_from_millis(ms);
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::ValidationError(format!("{key}={raw:?} is not a valid number"))),
    }
}

fn parse_bind(raw: &str) -> Result<SocketAddr, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("invalid bind address {raw:?}")))
}

/// Zero means "no timeout"
#[must_use]
pub fn timeout_from_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
