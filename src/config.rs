//! Configuration module for the pixelflut server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Smallest staging buffer that still fits an `I` response.
pub const MIN_BUFFER_SIZE: usize = 16;

/// Command-line arguments for the pixel server
#[derive(Parser, Debug, Default)]
#[command(name = "pixelflut-server")]
#[command(author = "pixelflut-server authors")]
#[command(version = "0.1.0")]
#[command(about = "A multi-client pixel canvas server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:1337)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Listen backlog handed to the kernel
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Maximum number of simultaneously serviced connections
    #[arg(short = 'n', long)]
    pub max_connections: Option<usize>,

    /// Capacity of each per-connection staging buffer in bytes
    #[arg(short = 'b', long)]
    pub buffer_size: Option<usize>,

    /// Canvas width in pixels
    #[arg(long)]
    pub width: Option<u32>,

    /// Canvas height in pixels
    #[arg(long)]
    pub height: Option<u32>,

    /// Seconds between stats reports (0 = disabled)
    #[arg(long)]
    pub stats_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub canvas: CanvasConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Listen backlog handed to the kernel
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Connection pool capacity
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Staging buffer capacity (inbound and outbound)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            buffer_size: default_buffer_size(),
        }
    }
}

/// Canvas dimensions
#[derive(Debug, Deserialize)]
pub struct CanvasConfig {
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: default_dimension(),
            height: default_dimension(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Seconds between stats reports
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stats_interval: default_stats_interval(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:1337".to_string()
}

fn default_backlog() -> i32 {
    128
}

fn default_max_connections() -> usize {
    64
}

fn default_buffer_size() -> usize {
    1024
}

fn default_dimension() -> u32 {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_interval() -> u64 {
    10
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub backlog: i32,
    pub max_connections: usize,
    pub buffer_size: usize,
    pub width: u32,
    pub height: u32,
    pub stats_interval: u64,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen: SocketAddr = listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(listen.clone()))?;

        let config = Config {
            listen,
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            buffer_size: cli.buffer_size.unwrap_or(toml_config.server.buffer_size),
            width: cli.width.unwrap_or(toml_config.canvas.width),
            height: cli.height.unwrap_or(toml_config.canvas.height),
            stats_interval: cli
                .stats_interval
                .unwrap_or(toml_config.logging.stats_interval),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::EmptyCanvas);
        }
        if self.buffer_size < MIN_BUFFER_SIZE || u32::try_from(self.buffer_size).is_err() {
            return Err(ConfigError::BufferSize(self.buffer_size));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::NoConnections);
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidListen(String),
    EmptyCanvas,
    BufferSize(usize),
    NoConnections,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidListen(addr) => {
                write!(f, "Invalid listen address '{}'", addr)
            }
            ConfigError::EmptyCanvas => write!(f, "Canvas width and height must be non-zero"),
            ConfigError::BufferSize(size) => write!(
                f,
                "Buffer size {} out of range (must be at least {} and fit in 32 bits)",
                size, MIN_BUFFER_SIZE
            ),
            ConfigError::NoConnections => write!(f, "max_connections must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}
