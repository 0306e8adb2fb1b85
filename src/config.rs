//! Configuration module for the shuffle-echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "shuffle-echo")]
#[command(author = "shuffle-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "A line-reversing TCP server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:28888)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum number of simultaneous connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Maximum number of readiness events handled per poll
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Per-connection read buffer size in bytes
    #[arg(long)]
    pub read_buffer_size: Option<usize>,

    /// Longest line payload kept before truncation
    #[arg(long)]
    pub max_line_length: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and event loop configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Connections beyond this are closed right after accept
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Event capacity for a single poll
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            batch_size: default_batch_size(),
        }
    }
}

/// Per-connection protocol configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Banner sent on connect, without the trailing CRLF
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: default_read_buffer_size(),
            max_line_length: default_max_line_length(),
            greeting: default_greeting(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:28888".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_batch_size() -> usize {
    1024
}

fn default_read_buffer_size() -> usize {
    1024
}

fn default_max_line_length() -> usize {
    255
}

fn default_greeting() -> String {
    "Welcome to the shuffle echo server, type any text and press enter for shuffling".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub max_connections: usize,
    pub batch_size: usize,
    pub read_buffer_size: usize,
    pub max_line_length: usize,
    pub greeting: String,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

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
            .map_err(|e| ConfigError::InvalidAddr(listen.clone(), e))?;

        let config = Config {
            listen,
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            batch_size: cli.batch_size.unwrap_or(toml_config.server.batch_size),
            read_buffer_size: cli
                .read_buffer_size
                .unwrap_or(toml_config.connection.read_buffer_size),
            max_line_length: cli
                .max_line_length
                .unwrap_or(toml_config.connection.max_line_length),
            greeting: toml_config.connection.greeting,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.read_buffer_size == 0 {
            return Err(ConfigError::Invalid("read_buffer_size must be non-zero"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be non-zero"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be non-zero"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let toml_config = TomlConfig::default();
        Config {
            listen: SocketAddr::from(([0, 0, 0, 0], 28888)),
            max_connections: toml_config.server.max_connections,
            batch_size: toml_config.server.batch_size,
            read_buffer_size: toml_config.connection.read_buffer_size,
            max_line_length: toml_config.connection.max_line_length,
            greeting: toml_config.connection.greeting,
            log_level: toml_config.logging.level,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid listen address '{0}': {1}")]
    InvalidAddr(String, #[source] std::net::AddrParseError),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:28888");
        assert_eq!(config.server.max_connections, 10_000);
        assert_eq!(config.connection.read_buffer_size, 1024);
        assert_eq!(config.connection.max_line_length, 255);
        assert!(config.connection.greeting.starts_with("Welcome"));
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:9000"
            max_connections = 64

            [connection]
            read_buffer_size = 512
            greeting = "hi"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.server.batch_size, 1024);
        assert_eq!(config.connection.read_buffer_size, 512);
        assert_eq!(config.connection.max_line_length, 255);
        assert_eq!(config.connection.greeting, "hi");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "127.0.0.1:9000"

            [logging]
            level = "warn"
        "#,
        )
        .unwrap();
        let cli = CliArgs {
            listen: Some("127.0.0.1:9001".to_string()),
            max_line_length: Some(16),
            ..Default::default()
        };

        let config = Config::merge(cli, toml_config).unwrap();
        assert_eq!(config.listen.port(), 9001);
        assert_eq!(config.max_line_length, 16);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cli = CliArgs {
            listen: Some("not an address".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Config::merge(cli, TomlConfig::default()),
            Err(ConfigError::InvalidAddr(..))
        ));

        let cli = CliArgs {
            read_buffer_size: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            Config::merge(cli, TomlConfig::default()),
            Err(ConfigError::Invalid(_))
        ));
    }
}
