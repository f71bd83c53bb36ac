//! Configuration module for the mlogd server.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the log server
#[derive(Parser, Debug)]
#[command(name = "mlogd")]
#[command(version = "0.1.0")]
#[command(about = "A connection-oriented message logging server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (1-65535)
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Path of the append-only message log
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Maximum number of simultaneous clients
    #[arg(short = 'n', long)]
    pub max_clients: Option<usize>,

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
    pub log: LogConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum number of simultaneous clients
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_clients: default_max_clients(),
        }
    }
}

/// Message log configuration
#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Path of the append-only message log
    #[serde(default = "default_file")]
    pub file: PathBuf,
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: default_file(),
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5555
}

fn default_max_clients() -> usize {
    64
}

fn default_file() -> PathBuf {
    PathBuf::from("messages.log")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub max_clients: usize,
    pub file: PathBuf,
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

    /// Merge CLI args with TOML config (CLI takes precedence).
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let port = cli.port.unwrap_or(toml_config.server.port);
        // The CLI parser already enforces the range; a TOML port can still
        // be zero.
        if port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        let max_clients = cli.max_clients.unwrap_or(toml_config.server.max_clients);
        if max_clients == 0 {
            return Err(ConfigError::InvalidCapacity);
        }

        Ok(Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port,
            max_clients,
            file: cli.file.unwrap_or(toml_config.log.file),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.log.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidPort,
    InvalidCapacity,
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
            ConfigError::InvalidPort => {
                write!(f, "Port must be a positive integer less than 65536")
            }
            ConfigError::InvalidCapacity => {
                write!(f, "max_clients must be at least 1")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
