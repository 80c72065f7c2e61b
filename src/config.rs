//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use crate::protocol::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_HANDSHAKE_SIZE};
use crate::server::{
    ServerOptions, DEFAULT_EVENTS_CAPACITY, DEFAULT_MAX_PENDING_OUTPUT, DEFAULT_READ_BUFFER_SIZE,
};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listening socket and event loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    #[serde(default = "default_max_handshake_size")]
    pub max_handshake_size: usize,

    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,

    /// Peers whose unwritten output grows past this are dropped
    #[serde(default = "default_max_pending_output")]
    pub max_pending_output: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

fn default_max_handshake_size() -> usize {
    DEFAULT_MAX_HANDSHAKE_SIZE
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_events_capacity() -> usize {
    DEFAULT_EVENTS_CAPACITY
}

fn default_max_pending_output() -> usize {
    DEFAULT_MAX_PENDING_OUTPUT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            read_buffer_size: default_read_buffer_size(),
            max_handshake_size: default_max_handshake_size(),
            max_frame_size: default_max_frame_size(),
            events_capacity: default_events_capacity(),
            max_pending_output: default_max_pending_output(),
        }
    }
}

impl ServerConfig {
    /// Resolve `host:port` to the first matching socket address
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let target = format!("{}:{}", self.host, self.port);
        target
            .to_socket_addrs()
            .map_err(|e| ConfigError::Address {
                address: target.clone(),
                error: e.to_string(),
            })?
            .next()
            .ok_or_else(|| ConfigError::Address {
                address: target.clone(),
                error: "no addresses resolved".to_string(),
            })
    }

    /// Event loop tunables derived from this config
    pub fn options(&self) -> ServerOptions {
        ServerOptions {
            read_buffer_size: self.read_buffer_size,
            max_handshake_size: self.max_handshake_size,
            max_frame_size: self.max_frame_size,
            events_capacity: self.events_capacity,
            max_pending_output: self.max_pending_output,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    /// Append-only sink for error events (readiness-wait failures and the like)
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("wirecast").join("config.toml")),
            Some(PathBuf::from("/etc/wirecast/config.toml")),
            Some(PathBuf::from("./wirecast.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(host) = var("WIRECAST_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("WIRECAST_PORT") {
            match port.parse() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!("Ignoring invalid WIRECAST_PORT: {}", port),
            }
        }

        if let Some(level) = var("WIRECAST_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("WIRECAST_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(file) = var("WIRECAST_LOG_FILE") {
            self.logging.file = Some(file);
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid listen address {address}: {error}")]
    Address { address: String, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Wirecast Configuration
#
# Environment variables override these settings:
# - WIRECAST_HOST
# - WIRECAST_PORT
# - WIRECAST_LOG_LEVEL
# - WIRECAST_LOG_FORMAT
# - WIRECAST_LOG_FILE

[server]
# Address to listen on
host = "0.0.0.0"

# Port to listen on
port = 8080

# Bytes requested per socket read
read_buffer_size = 2048

# Largest accepted handshake request head (bytes)
max_handshake_size = 8192

# Largest accepted frame payload (bytes)
max_frame_size = 16777216

# Readiness events collected per loop iteration
events_capacity = 1024

# Unwritten bytes queued for one client before it is dropped
max_pending_output = 33554432

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional error log file (appended to)
# file = "./wirecast.log"
"#
    .to_string()
}
