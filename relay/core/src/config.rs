//! TOML Configuration File Support
//!
//! Centralized configuration for the relay, loaded from
//! `~/.config/finance-relay/relay.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/finance-relay/relay.toml` (typically
//!   `~/.config/finance-relay/relay.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! listen_addr = "0.0.0.0:8080"
//!
//! [log]
//! partitions = 4
//! producer_capacity = 1024
//!
//! [pipeline]
//! queue_capacity = 100
//! inbox_capacity = 100
//!
//! [buffer]
//! max_buffered_fragments = 1000
//! overflow_policy = "drop_oldest"
//! terminal_policy = "discard"
//! idle_ttl_secs = 300
//! sweep_interval_secs = 30
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Field |
//! |---|---|
//! | `RELAY_LISTEN_ADDR` | `server.listen_addr` |
//! | `PORT` | port of `server.listen_addr`, bound on all interfaces |
//! | `RELAY_PARTITIONS` | `log.partitions` |
//! | `RELAY_QUEUE_CAPACITY` | `pipeline.queue_capacity` |
//! | `RELAY_INBOX_CAPACITY` | `pipeline.inbox_capacity` |
//! | `RELAY_MAX_BUFFERED` | `buffer.max_buffered_fragments` |
//! | `RELAY_BUFFER_TTL` | `buffer.idle_ttl_secs` |

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pool::PoolConfig;
use crate::streaming::{BufferOverflowPolicy, StreamRegistryConfig, TerminalPolicy};

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
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Address the HTTP server binds to
    pub listen_addr: Option<String>,
}

/// Log section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogToml {
    /// Partitions of the in-process log
    pub partitions: Option<usize>,

    /// Records the producer may queue ahead of ingestion
    pub producer_capacity: Option<usize>,
}

/// Pipeline section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineToml {
    /// Capacity of each partition queue
    pub queue_capacity: Option<usize>,

    /// Capacity of each connection inbox
    pub inbox_capacity: Option<usize>,
}

/// Buffer section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferToml {
    /// Maximum fragments held per unwatched conversation
    pub max_buffered_fragments: Option<usize>,

    /// `drop_oldest` or `drop_newest`
    pub overflow_policy: Option<BufferOverflowPolicy>,

    /// `discard` or `retain`
    pub terminal_policy: Option<TerminalPolicy>,

    /// Seconds without new fragments before a buffer is pruned
    pub idle_ttl_secs: Option<u64>,

    /// Seconds between prune sweeps
    pub sweep_interval_secs: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Server configuration section
    pub server: ServerToml,

    /// Log configuration section
    pub log: LogToml,

    /// Pipeline configuration section
    pub pipeline: PipelineToml,

    /// Buffer configuration section
    pub buffer: BufferToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized configuration for the relay
///
/// Use [`load_config`] to load with proper priority handling.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// HTTP listen address
    pub listen_addr: SocketAddr,

    /// Partitions of the in-process log, and so workers in the pool
    pub partitions: usize,

    /// Records the log producer may queue ahead of ingestion
    pub producer_capacity: usize,

    /// Capacity of each partition queue
    pub queue_capacity: usize,

    /// Capacity of each connection inbox
    pub inbox_capacity: usize,

    /// Maximum fragments held per unwatched conversation
    pub max_buffered_fragments: usize,

    /// Behaviour of a full conversation buffer
    pub overflow_policy: BufferOverflowPolicy,

    /// Behaviour on a terminal fragment with nobody watching
    pub terminal_policy: TerminalPolicy,

    /// Idle time after which a pending buffer is pruned
    pub buffer_idle_ttl: Duration,

    /// Interval between prune sweeps
    pub sweep_interval: Duration,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            partitions: 4,
            producer_capacity: 1024,
            queue_capacity: 100,
            inbox_capacity: 100,
            max_buffered_fragments: 1000,
            overflow_policy: BufferOverflowPolicy::DropOldest,
            terminal_policy: TerminalPolicy::Discard,
            buffer_idle_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Settings for the stream registry
    #[must_use]
    pub fn registry_config(&self) -> StreamRegistryConfig {
        StreamRegistryConfig {
            inbox_capacity: self.inbox_capacity,
            max_buffered_fragments: self.max_buffered_fragments,
            overflow_policy: self.overflow_policy,
            terminal_policy: self.terminal_policy,
        }
    }

    /// Settings for the worker pool
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            queue_capacity: self.queue_capacity,
        }
    }

    /// Reject values the pipeline cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("log.partitions", self.partitions),
            ("log.producer_capacity", self.producer_capacity),
            ("pipeline.queue_capacity", self.queue_capacity),
            ("pipeline.inbox_capacity", self.inbox_capacity),
            ("buffer.max_buffered_fragments", self.max_buffered_fragments),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{field} must be greater than zero"
                )));
            }
        }
        if i32::try_from(self.partitions).is_err() {
            return Err(ConfigError::ValidationError(format!(
                "log.partitions must not exceed {}",
                i32::MAX
            )));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "buffer.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/finance-relay/relay.toml` or
/// `~/.config/finance-relay/relay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("finance-relay").join("relay.toml"))
}

/// Load configuration from all sources with proper priority
///
/// CLI overrides are not handled here; apply [`ConfigOverrides`] after.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration reading environment variables through `env`
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = RelayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_config = read_toml(config_path)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);

    Ok(config)
}

fn read_toml(path: &Path) -> Result<RelayToml, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut RelayConfig, toml: &RelayToml) -> Result<(), ConfigError> {
    if let Some(ref addr) = toml.server.listen_addr {
        config.listen_addr = addr.parse().map_err(|_| {
            ConfigError::ValidationError(format!("server.listen_addr is not an address: {addr}"))
        })?;
    }

    if let Some(partitions) = toml.log.partitions {
        config.partitions = partitions;
    }
    if let Some(capacity) = toml.log.producer_capacity {
        config.producer_capacity = capacity;
    }

    if let Some(capacity) = toml.pipeline.queue_capacity {
        config.queue_capacity = capacity;
    }
    if let Some(capacity) = toml.pipeline.inbox_capacity {
        config.inbox_capacity = capacity;
    }

    if let Some(max) = toml.buffer.max_buffered_fragments {
        config.max_buffered_fragments = max;
    }
    if let Some(policy) = toml.buffer.overflow_policy {
        config.overflow_policy = policy;
    }
    if let Some(policy) = toml.buffer.terminal_policy {
        config.terminal_policy = policy;
    }
    if let Some(secs) = toml.buffer.idle_ttl_secs {
        config.buffer_idle_ttl = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.buffer.sweep_interval_secs {
        config.sweep_interval = Duration::from_secs(secs);
    }

    Ok(())
}

/// Apply environment variable overrides to the config
///
/// Unparseable values are ignored with a warning.
fn apply_env_config<F>(config: &mut RelayConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let parsed = |key: &str| -> Option<usize> {
        let raw = env(key)?;
        match raw.parse::<usize>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring unparseable environment variable");
                None
            }
        }
    };

    if let Some(port) = env("PORT").and_then(|p| p.parse::<u16>().ok()) {
        config.listen_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        config.source = ConfigSource::Env;
    }
    if let Some(addr) = env("RELAY_LISTEN_ADDR") {
        match addr.parse() {
            Ok(addr) => {
                config.listen_addr = addr;
                config.source = ConfigSource::Env;
            }
            Err(_) => {
                tracing::warn!(value = %addr, "Ignoring unparseable RELAY_LISTEN_ADDR");
            }
        }
    }

    if let Some(n) = parsed("RELAY_PARTITIONS") {
        config.partitions = n;
        config.source = ConfigSource::Env;
    }
    if let Some(n) = parsed("RELAY_QUEUE_CAPACITY") {
        config.queue_capacity = n;
        config.source = ConfigSource::Env;
    }
    if let Some(n) = parsed("RELAY_INBOX_CAPACITY") {
        config.inbox_capacity = n;
        config.source = ConfigSource::Env;
    }
    if let Some(n) = parsed("RELAY_MAX_BUFFERED") {
        config.max_buffered_fragments = n;
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = parsed("RELAY_BUFFER_TTL") {
        config.buffer_idle_ttl = Duration::from_secs(secs as u64);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Listen address override
    pub listen_addr: Option<SocketAddr>,

    /// Partition count override
    pub partitions: Option<usize>,

    /// Partition queue capacity override
    pub queue_capacity: Option<usize>,

    /// Inbox capacity override
    pub inbox_capacity: Option<usize>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listen address override
    #[must_use]
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = Some(addr);
        self
    }

    /// Set partition count override
    #[must_use]
    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// Set queue capacity override
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Set inbox capacity override
    #[must_use]
    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = Some(capacity);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut RelayConfig) {
        if self.listen_addr.is_some()
            || self.partitions.is_some()
            || self.queue_capacity.is_some()
            || self.inbox_capacity.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(addr) = self.listen_addr {
            config.listen_addr = addr;
        }
        if let Some(partitions) = self.partitions {
            config.partitions = partitions;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(capacity) = self.inbox_capacity {
            config.inbox_capacity = capacity;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
