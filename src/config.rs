//! Configuration module for the console log server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::error::ConfigError;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the log server
#[derive(Parser, Debug)]
#[command(name = "console-log-server")]
#[command(version)]
#[command(about = "Collects browser console logs over WebSocket", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory for the daily log files
    #[arg(short = 'd', long)]
    pub log_dir: Option<PathBuf>,

    /// Seconds between keep-alive pings (0 disables pings)
    #[arg(long)]
    pub ping_interval: Option<u64>,

    /// Seconds to wait for a pong before dropping the connection
    #[arg(long)]
    pub ping_timeout: Option<u64>,

    /// Maximum size of one inbound message in bytes
    #[arg(long)]
    pub max_message_size: Option<usize>,

    /// Seconds a client may take to complete the WebSocket handshake
    #[arg(long)]
    pub handshake_timeout: Option<u64>,

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
    pub keepalive: KeepaliveConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum size of one inbound message in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Seconds a client may take to complete the WebSocket handshake
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_message_size: default_max_message_size(),
            handshake_timeout: default_handshake_timeout(),
        }
    }
}

/// Keep-alive probe configuration
#[derive(Debug, Deserialize)]
pub struct KeepaliveConfig {
    /// Seconds between pings
    #[serde(default = "default_ping_interval")]
    pub interval: u64,
    /// Seconds to wait for the matching pong
    #[serde(default = "default_ping_timeout")]
    pub timeout: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: default_ping_interval(),
            timeout: default_ping_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for the daily log files
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_ping_interval() -> u64 {
    30
}

fn default_ping_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("../logs/browser")
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_dir: PathBuf,
    /// `None` disables keep-alive pings
    pub ping_interval: Option<Duration>,
    pub ping_timeout: Duration,
    pub max_message_size: usize,
    pub handshake_timeout: Duration,
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

        Ok(Self::merge(cli, toml_config))
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let interval = cli
            .ping_interval
            .unwrap_or(toml_config.keepalive.interval);

        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            log_dir: cli.log_dir.unwrap_or(toml_config.logging.dir),
            ping_interval: (interval > 0).then(|| Duration::from_secs(interval)),
            ping_timeout: Duration::from_secs(
                cli.ping_timeout.unwrap_or(toml_config.keepalive.timeout),
            ),
            max_message_size: cli
                .max_message_size
                .unwrap_or(toml_config.server.max_message_size),
            handshake_timeout: Duration::from_secs(
                cli.handshake_timeout
                    .unwrap_or(toml_config.server.handshake_timeout),
            ),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// `host:port` as given, before resolution.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::parse_from(["console-log-server"]), TomlConfig::default())
    }
}
