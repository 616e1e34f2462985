//! Configuration management for drivesense.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "drivesense";

/// Default snapshot file name for the JSON backend.
const JSON_FILE_NAME: &str = "data.json";

/// Default database file name for the `SQLite` backend.
const DATABASE_FILE_NAME: &str = "snapshot.db";

/// Largest payload a UDP datagram can carry.
const MAX_UDP_PAYLOAD: usize = 65_535;

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "DRIVESENSE_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `DRIVESENSE_`, sections separated
///    by `__`, e.g. `DRIVESENSE_LISTENER__PORT=5000`)
/// 2. TOML config file at `~/.config/drivesense/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Datagram listener configuration.
    pub listener: ListenerConfig,
    /// HTTP query endpoint configuration.
    pub http: HttpConfig,
    /// Snapshot persistence configuration.
    pub storage: StorageConfig,
    /// Snapshot store configuration.
    pub store: StoreConfig,
}

/// Datagram listener configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface address to bind.
    pub bind_address: String,
    /// UDP port to bind.
    pub port: u16,
    /// Receive buffer size; longer datagrams are truncated by the OS.
    pub max_datagram_size: usize,
}

/// HTTP query endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Serve the HTTP endpoint at all.
    pub enabled: bool,
    /// Interface address to bind.
    pub bind_address: String,
    /// TCP port to bind.
    pub port: u16,
    /// Route serving `GET` (read) and `POST` (push).
    pub route: String,
}

/// Which backend persists the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Pretty-printed JSON file replaced atomically on every save.
    #[default]
    Json,
    /// Single-row `SQLite` table.
    Sqlite,
    /// No persistence; state is lost on exit.
    Memory,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Sqlite => write!(f, "sqlite"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Snapshot persistence configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend kind.
    pub backend: BackendKind,
    /// Path of the snapshot file or database.
    /// Defaults to `~/.local/share/drivesense/data.json` (or `snapshot.db`).
    pub path: Option<PathBuf>,
    /// Upper bound on a single save before it is abandoned, in milliseconds.
    pub persist_timeout_ms: u64,
}

/// Snapshot store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Capacity of the merge queue in front of the store.
    pub queue_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 41234,
            max_datagram_size: 65_535,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
            route: "/api/sensor-data".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Json,
            path: None, // Resolved per backend at runtime
            persist_timeout_ms: 2_000,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1_024,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        self.listener_addr()?;
        self.http_addr()?;

        if self.listener.max_datagram_size == 0 {
            return Err(invalid("listener.max_datagram_size must be greater than 0"));
        }

        if self.listener.max_datagram_size > MAX_UDP_PAYLOAD {
            return Err(invalid(format!(
                "listener.max_datagram_size must be at most {MAX_UDP_PAYLOAD}"
            )));
        }

        if !self.http.route.starts_with('/') {
            return Err(invalid(format!(
                "http.route must start with '/': {}",
                self.http.route
            )));
        }

        if self.storage.persist_timeout_ms == 0 {
            return Err(invalid("storage.persist_timeout_ms must be greater than 0"));
        }

        if self.store.queue_capacity == 0 {
            return Err(invalid("store.queue_capacity must be greater than 0"));
        }

        Ok(())
    }

    /// The datagram listener's socket address.
    ///
    /// # Errors
    ///
    /// Returns an error if `listener.bind_address` is not an IP address.
    pub fn listener_addr(&self) -> Result<SocketAddr> {
        socket_addr("listener", &self.listener.bind_address, self.listener.port)
    }

    /// The HTTP endpoint's socket address.
    ///
    /// # Errors
    ///
    /// Returns an error if `http.bind_address` is not an IP address.
    pub fn http_addr(&self) -> Result<SocketAddr> {
        socket_addr("http", &self.http.bind_address, self.http.port)
    }

    /// Get the snapshot path, resolving the per-backend default if not set.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.storage.path.clone().unwrap_or_else(|| {
            let file_name = match self.storage.backend {
                BackendKind::Sqlite => DATABASE_FILE_NAME,
                BackendKind::Json | BackendKind::Memory => JSON_FILE_NAME,
            };
            Self::default_data_dir().join(file_name)
        })
    }

    /// Get the persist timeout as a Duration.
    #[must_use]
    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.persist_timeout_ms)
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}

fn socket_addr(section: &str, address: &str, port: u16) -> Result<SocketAddr> {
    let ip: IpAddr = address.parse().map_err(|_| {
        invalid(format!(
            "{section}.bind_address is not an IP address: {address}"
        ))
    })?;
    Ok(SocketAddr::new(ip, port))
}
