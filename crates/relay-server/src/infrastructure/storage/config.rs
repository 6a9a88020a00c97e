//! TOML-based configuration for the relay server.
//!
//! The config file is optional: every field has a serde default, and a
//! missing file yields [`RelayConfig::default()`], so the server runs with
//! no configuration at all. Command-line flags take precedence over file
//! values; the merge happens in `main.rs`.
//!
//! ```toml
//! [network]
//! port = 9000
//! bind_address = "0.0.0.0"
//!
//! [relay]
//! delivery_queue_capacity = 64
//! read_buffer_bytes = 8192
//! shutdown_grace_ms = 250
//!
//! [log]
//! level = "warn"
//! db_path = "relaylog.db"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The bind address and port do not form a valid socket address.
    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub log: LogConfig,
}

/// Listener port and bind-address settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// TCP port to listen on. Port 0 lets the OS pick an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// IP address to bind the listener to. `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Tunables for the relay core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelaySettings {
    /// Chunks buffered per receiver before the slow-receiver policy
    /// disconnects it.
    #[serde(default = "default_queue_capacity")]
    pub delivery_queue_capacity: usize,
    /// Size of each session's read buffer; also the largest possible chunk.
    #[serde(default = "default_read_buffer_bytes")]
    pub read_buffer_bytes: usize,
    /// How long `stop()` waits for live sessions to drain before
    /// force-closing them.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// Activity and traffic logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    /// Base `tracing` filter when neither `RUST_LOG` nor `--verbose` is in
    /// effect: `"error"`, `"warn"`, `"info"`, `"debug"`, or `"trace"`.
    /// The default keeps the relay silent apart from fatal failures.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// SQLite database to log traffic to. Absent or empty disables the
    /// traffic log. Overridden by `--db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_port() -> u16 {
    9000
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_queue_capacity() -> usize {
    64
}
fn default_read_buffer_bytes() -> usize {
    8192
}
fn default_shutdown_grace_ms() -> u64 {
    250
}
fn default_log_level() -> String {
    "error".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            delivery_queue_capacity: default_queue_capacity(),
            read_buffer_bytes: default_read_buffer_bytes(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            db_path: None,
        }
    }
}

impl RelayConfig {
    /// The socket address the listener binds to.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBindAddress`] when `bind_address` and
    /// `port` do not combine into a parseable address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let text = format!("{}:{}", self.network.bind_address, self.network.port);
        text.parse()
            .map_err(|_| ConfigError::InvalidBindAddress(text))
    }

    /// The graceful-shutdown drain window as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.relay.shutdown_grace_ms)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads a [`RelayConfig`] from `path`, returning defaults when the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not
/// found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<RelayConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: RelayConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
