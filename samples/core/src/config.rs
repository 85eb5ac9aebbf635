//! Sample Configuration
//!
//! Layered configuration for every sample role.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables (`IPC_*`)
//! 3. TOML configuration file (`--config` or `IPC_SAMPLES_CONFIG`)
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [socket]
//! server_address = "unix_sock.server"
//! client_address = "unix_sock.client"
//! local_bind = true
//! backlog = 10
//! timeout_ms = 0
//! connect_attempts = 1
//! connect_backoff_ms = 50
//!
//! [fifo]
//! path = "pipename"
//! count = 5
//! interval_ms = 100
//!
//! [shm]
//! name = "/ipc_sample_counter"
//! rounds = 5
//! interval_ms = 100
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::control::{CancelToken, OpControl};
use crate::fifo::{FifoPlan, DEFAULT_INTERVAL, DEFAULT_RECORD_COUNT};
use crate::shm::{SharedCounter, TurnPlan, DEFAULT_ROUNDS, DEFAULT_TURN_INTERVAL};
use crate::transport::{ConnectRetry, Connector, Listener, SocketAddress, DEFAULT_BACKLOG};

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "IPC_SAMPLES_CONFIG";

/// Default listener address, relative to the working directory
pub const DEFAULT_SERVER_ADDRESS: &str = "unix_sock.server";

/// Default connector address, relative to the working directory
pub const DEFAULT_CLIENT_ADDRESS: &str = "unix_sock.client";

/// Default FIFO path, relative to the working directory
pub const DEFAULT_FIFO_PATH: &str = "pipename";

/// Default shared-memory object name
pub const DEFAULT_SHM_NAME: &str = "/ipc_sample_counter";

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

/// Tracks where the highest-priority configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
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

/// `[socket]` section
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SocketToml {
    /// Listener address
    pub server_address: Option<PathBuf>,
    /// Connector local address
    pub client_address: Option<PathBuf>,
    /// Whether the connector binds its local address
    pub local_bind: Option<bool>,
    /// Pending-connection queue length
    pub backlog: Option<u32>,
    /// Per-operation timeout in milliseconds (0 = none)
    pub timeout_ms: Option<u64>,
    /// Connect attempts (1 = no retry)
    pub connect_attempts: Option<u32>,
    /// Initial retry backoff in milliseconds
    pub connect_backoff_ms: Option<u64>,
}

/// `[fifo]` section
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FifoToml {
    /// FIFO path
    pub path: Option<PathBuf>,
    /// Records per run
    pub count: Option<u32>,
    /// Pause between records in milliseconds
    pub interval_ms: Option<u64>,
}

/// `[shm]` section
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ShmToml {
    /// Shared-memory object name
    pub name: Option<String>,
    /// Turns per participant
    pub rounds: Option<u32>,
    /// Pause between turns in milliseconds
    pub interval_ms: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SamplesToml {
    /// Socket sample section
    pub socket: SocketToml,
    /// Named pipe sample section
    pub fifo: FifoToml,
    /// Shared-memory sample section
    pub shm: ShmToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Socket sample settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocketSettings {
    /// Listener address
    pub server_address: PathBuf,
    /// Connector local address; `None` skips the connector's bind
    pub client_address: Option<PathBuf>,
    /// Pending-connection queue length
    pub backlog: u32,
    /// Per-operation timeout
    pub timeout: Option<Duration>,
    /// Connect retry policy
    pub retry: ConnectRetry,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            server_address: PathBuf::from(DEFAULT_SERVER_ADDRESS),
            client_address: Some(PathBuf::from(DEFAULT_CLIENT_ADDRESS)),
            backlog: DEFAULT_BACKLOG,
            timeout: None,
            retry: ConnectRetry::default(),
        }
    }
}

impl SocketSettings {
    /// Operation control with this timeout and the given cancellation token
    #[must_use]
    pub fn control(&self, cancel: CancelToken) -> OpControl {
        OpControl::unbounded()
            .with_timeout(self.timeout)
            .with_cancel(cancel)
    }

    /// Build the listener role
    ///
    /// # Errors
    ///
    /// Returns `IpcError::AddressInUseOrInvalid` for a malformed address.
    pub fn listener(&self, control: OpControl) -> crate::Result<Listener> {
        let address = SocketAddress::new(&self.server_address)?;
        Ok(Listener::new(address, control).with_backlog(self.backlog))
    }

    /// Build the connector role
    ///
    /// # Errors
    ///
    /// Returns `IpcError::AddressInUseOrInvalid` for a malformed address.
    pub fn connector(&self, control: OpControl) -> crate::Result<Connector> {
        let remote = SocketAddress::new(&self.server_address)?;
        let local = self
            .client_address
            .as_ref()
            .map(SocketAddress::new)
            .transpose()?;
        Ok(Connector::new(remote, local, control).with_retry(self.retry))
    }
}

/// Named pipe sample settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FifoSettings {
    /// FIFO path
    pub path: PathBuf,
    /// Records per run
    pub count: u32,
    /// Pause between records
    pub interval: Duration,
}

impl Default for FifoSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_FIFO_PATH),
            count: DEFAULT_RECORD_COUNT,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl FifoSettings {
    /// Plan shared by producer and consumer
    #[must_use]
    pub fn plan(&self) -> FifoPlan {
        FifoPlan {
            path: self.path.clone(),
            count: self.count,
            interval: self.interval,
        }
    }
}

/// Shared-memory sample settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShmSettings {
    /// Object name
    pub name: String,
    /// Turns per participant
    pub rounds: u32,
    /// Pause between turns
    pub interval: Duration,
}

impl Default for ShmSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_SHM_NAME.to_string(),
            rounds: DEFAULT_ROUNDS,
            interval: DEFAULT_TURN_INTERVAL,
        }
    }
}

impl ShmSettings {
    /// Handle to the configured counter
    ///
    /// # Errors
    ///
    /// Returns `IpcError::SharedMemoryFailed` for a malformed name.
    pub fn counter(&self) -> crate::Result<SharedCounter> {
        SharedCounter::new(self.name.clone())
    }

    /// Plan for one participant
    ///
    /// # Errors
    ///
    /// Returns `IpcError::SharedMemoryFailed` for a malformed name.
    pub fn plan(&self) -> crate::Result<TurnPlan> {
        Ok(TurnPlan {
            counter: self.counter()?,
            rounds: self.rounds,
            interval: self.interval,
        })
    }
}

/// Resolved configuration for all samples
#[derive(Clone, Debug)]
pub struct SamplesConfig {
    /// Socket sample
    pub socket: SocketSettings,
    /// Named pipe sample
    pub fifo: FifoSettings,
    /// Shared-memory sample
    pub shm: ShmSettings,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for SamplesConfig {
    fn default() -> Self {
        Self {
            socket: SocketSettings::default(),
            fifo: FifoSettings::default(),
            shm: ShmSettings::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl SamplesConfig {
    /// Get the highest-priority source applied
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check values that would otherwise fail deep inside a role
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        SocketAddress::new(&self.socket.server_address)
            .map_err(|e| ConfigError::ValidationError(format!("socket.server_address: {e}")))?;
        if let Some(client) = &self.socket.client_address {
            SocketAddress::new(client)
                .map_err(|e| ConfigError::ValidationError(format!("socket.client_address: {e}")))?;
        }
        if self.socket.backlog == 0 {
            return Err(ConfigError::ValidationError(
                "socket.backlog must be at least 1".into(),
            ));
        }
        if self.socket.retry.attempts == 0 {
            return Err(ConfigError::ValidationError(
                "socket.connect_attempts must be at least 1".into(),
            ));
        }
        if self.fifo.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError("fifo.path is empty".into()));
        }
        self.shm
            .counter()
            .map_err(|e| ConfigError::ValidationError(format!("shm.name: {e}")))?;
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Load configuration from the file named by `IPC_SAMPLES_CONFIG` (if set)
/// and the process environment
///
/// # Errors
///
/// Returns an error if the config file cannot be read or parsed, or a value
/// is invalid.
pub fn load_config() -> Result<SamplesConfig, ConfigError> {
    load_config_from_path(std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
}

/// Load configuration from a specific path and the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or a value is invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<SamplesConfig, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Load configuration reading environment variables through `env`
///
/// A missing file is an error here: the caller named it explicitly.
///
/// # Errors
///
/// Returns an error if the config file cannot be read or parsed, or a value
/// is invalid.
pub fn load_config_with(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<SamplesConfig, ConfigError> {
    let mut config = SamplesConfig::default();

    if let Some(config_path) = path {
        let toml_content =
            std::fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadError {
                path: config_path.clone(),
                source: e,
            })?;

        let toml_config: SamplesToml = toml::from_str(&toml_content)?;
        apply_toml_config(&mut config, &toml_config);
        config.config_file_path = Some(config_path.clone());
        config.source = ConfigSource::File;

        tracing::info!(
            path = %config_path.display(),
            "Loaded configuration from file"
        );
    }

    apply_env_config(&mut config, env)?;
    config.validate()?;

    Ok(config)
}

fn apply_toml_config(config: &mut SamplesConfig, toml: &SamplesToml) {
    // Socket settings
    if let Some(address) = &toml.socket.server_address {
        config.socket.server_address.clone_from(address);
    }
    if let Some(address) = &toml.socket.client_address {
        config.socket.client_address = Some(address.clone());
    }
    if toml.socket.local_bind == Some(false) {
        config.socket.client_address = None;
    }
    if let Some(backlog) = toml.socket.backlog {
        config.socket.backlog = backlog;
    }
    if let Some(ms) = toml.socket.timeout_ms {
        config.socket.timeout = timeout_from_ms(ms);
    }
    if let Some(attempts) = toml.socket.connect_attempts {
        config.socket.retry.attempts = attempts;
    }
    if let Some(ms) = toml.socket.connect_backoff_ms {
        config.socket.retry.backoff = Duration::from_millis(ms);
    }

    // FIFO settings
    if let Some(path) = &toml.fifo.path {
        config.fifo.path.clone_from(path);
    }
    if let Some(count) = toml.fifo.count {
        config.fifo.count = count;
    }
    if let Some(ms) = toml.fifo.interval_ms {
        config.fifo.interval = Duration::from_millis(ms);
    }

    // Shared-memory settings
    if let Some(name) = &toml.shm.name {
        config.shm.name.clone_from(name);
    }
    if let Some(rounds) = toml.shm.rounds {
        config.shm.rounds = rounds;
    }
    if let Some(ms) = toml.shm.interval_ms {
        config.shm.interval = Duration::from_millis(ms);
    }
}

fn apply_env_config(
    config: &mut SamplesConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(path) = env("IPC_SERVER_SOCKET") {
        config.socket.server_address = PathBuf::from(path);
        config.source = ConfigSource::Env;
    }
    if let Some(path) = env("IPC_CLIENT_SOCKET") {
        // An empty value disables the connector's bind.
        config.socket.client_address = (!path.is_empty()).then(|| PathBuf::from(path));
        config.source = ConfigSource::Env;
    }
    if let Some(backlog) = parse_env(&env, "IPC_BACKLOG")? {
        config.socket.backlog = backlog;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parse_env(&env, "IPC_TIMEOUT_MS")? {
        config.socket.timeout = timeout_from_ms(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(attempts) = parse_env(&env, "IPC_CONNECT_ATTEMPTS")? {
        config.socket.retry.attempts = attempts;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parse_env(&env, "IPC_CONNECT_BACKOFF_MS")? {
        config.socket.retry.backoff = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(path) = env("IPC_FIFO_PATH") {
        config.fifo.path = PathBuf::from(path);
        config.source = ConfigSource::Env;
    }
    if let Some(name) = env("IPC_SHM_NAME") {
        config.shm.name = name;
        config.source = ConfigSource::Env;
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::ValidationError(format!("{key}={raw:?} is not a number")))
        })
        .transpose()
}

fn timeout_from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied last
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Listener address override
    pub server_address: Option<PathBuf>,
    /// Connector local address override
    pub client_address: Option<PathBuf>,
    /// Skip the connector's bind
    pub no_local_bind: bool,
    /// Backlog override
    pub backlog: Option<u32>,
    /// Timeout override in milliseconds (0 = none)
    pub timeout_ms: Option<u64>,
    /// Connect attempts override
    pub connect_attempts: Option<u32>,
    /// FIFO path override
    pub fifo_path: Option<PathBuf>,
    /// FIFO record count override
    pub fifo_count: Option<u32>,
    /// Shared-memory name override
    pub shm_name: Option<String>,
    /// Shared-memory rounds override
    pub shm_rounds: Option<u32>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listener address override
    #[must_use]
    pub fn with_server_address(mut self, path: PathBuf) -> Self {
        self.server_address = Some(path);
        self
    }

    /// Set timeout override
    #[must_use]
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Set connect attempts override
    #[must_use]
    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = Some(attempts);
        self
    }

    fn is_empty(&self) -> bool {
        self.server_address.is_none()
            && self.client_address.is_none()
            && !self.no_local_bind
            && self.backlog.is_none()
            && self.timeout_ms.is_none()
            && self.connect_attempts.is_none()
            && self.fifo_path.is_none()
            && self.fifo_count.is_none()
            && self.shm_name.is_none()
            && self.shm_rounds.is_none()
    }

    /// Apply overrides to a configuration and re-validate it
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if an override is invalid.
    pub fn apply(&self, config: &mut SamplesConfig) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Ok(());
        }
        config.source = ConfigSource::Cli;

        if let Some(path) = &self.server_address {
            config.socket.server_address.clone_from(path);
        }
        if let Some(path) = &self.client_address {
            config.socket.client_address = Some(path.clone());
        }
        if self.no_local_bind {
            config.socket.client_address = None;
        }
        if let Some(backlog) = self.backlog {
            config.socket.backlog = backlog;
        }
        if let Some(ms) = self.timeout_ms {
            config.socket.timeout = timeout_from_ms(ms);
        }
        if let Some(attempts) = self.connect_attempts {
            config.socket.retry.attempts = attempts;
        }
        if let Some(path) = &self.fifo_path {
            config.fifo.path.clone_from(path);
        }
        if let Some(count) = self.fifo_count {
            config.fifo.count = count;
        }
        if let Some(name) = &self.shm_name {
            config.shm.name.clone_from(name);
        }
        if let Some(rounds) = self.shm_rounds {
            config.shm.rounds = rounds;
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
