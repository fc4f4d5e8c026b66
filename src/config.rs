//! Configuration module for the elastic-echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::coordinator::CapacityMode;
use crate::error::ConfigError;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the echo server
#[derive(Parser, Debug, Default)]
#[command(name = "elastic-echo")]
#[command(author = "elastic-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "A benchmarking TCP echo server with an elastic worker pool", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:7000)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of accept workers started before the first connection
    #[arg(short = 'w', long)]
    pub initial_workers: Option<usize>,

    /// Spare capacity below which every new connection spawns a worker
    #[arg(long)]
    pub low_water_mark: Option<usize>,

    /// Give spare capacity back when a connection finishes
    #[arg(long)]
    pub replenish: bool,

    /// Capacity of the connection-started event queue
    #[arg(long)]
    pub event_queue: Option<usize>,

    /// Listen backlog passed to the socket
    #[arg(long)]
    pub backlog: Option<u32>,

    /// Number of runtime threads (defaults to number of CPU cores)
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Directory the shutdown report is written to
    #[arg(short = 'r', long)]
    pub report_dir: Option<PathBuf>,

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
    pub pool: PoolConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Number of runtime threads
    pub threads: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            threads: None,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_initial_workers")]
    pub initial_workers: usize,
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: usize,
    #[serde(default)]
    pub replenish: bool,
    #[serde(default = "default_event_queue")]
    pub event_queue: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_workers: default_initial_workers(),
            low_water_mark: default_low_water_mark(),
            replenish: false,
            event_queue: default_event_queue(),
        }
    }
}

/// Report configuration
#[derive(Debug, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_report_dir")]
    pub dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: default_report_dir(),
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
    "0.0.0.0:7000".to_string()
}

fn default_backlog() -> u32 {
    1024
}

fn default_initial_workers() -> usize {
    15
}

fn default_low_water_mark() -> usize {
    10
}

fn default_event_queue() -> usize {
    10
}

fn default_report_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub backlog: u32,
    pub threads: Option<usize>,
    pub initial_workers: usize,
    pub low_water_mark: usize,
    pub capacity_mode: CapacityMode,
    pub event_queue: usize,
    pub report_dir: PathBuf,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::merge(CliArgs::default(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents =
                std::fs::read_to_string(config_path).map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        let config = Config::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let replenish = cli.replenish || toml_config.pool.replenish;

        Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            threads: cli.threads.or(toml_config.server.threads),
            initial_workers: cli
                .initial_workers
                .unwrap_or(toml_config.pool.initial_workers),
            low_water_mark: cli
                .low_water_mark
                .unwrap_or(toml_config.pool.low_water_mark),
            capacity_mode: if replenish {
                CapacityMode::Replenish
            } else {
                CapacityMode::Literal
            },
            event_queue: cli.event_queue.unwrap_or(toml_config.pool.event_queue),
            report_dir: cli.report_dir.unwrap_or(toml_config.report.dir),
            log_level: if cli.log_level.is_empty() || cli.log_level == "info" {
                toml_config.logging.level
            } else {
                cli.log_level
            },
        }
    }

    /// Reject values the pool cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_workers == 0 {
            return Err(ConfigError::Invalid(
                "initial_workers must be at least 1".to_string(),
            ));
        }
        if self.low_water_mark > self.initial_workers {
            return Err(ConfigError::Invalid(format!(
                "low_water_mark ({}) exceeds initial_workers ({})",
                self.low_water_mark, self.initial_workers
            )));
        }
        if self.event_queue == 0 {
            return Err(ConfigError::Invalid(
                "event_queue must be at least 1".to_string(),
            ));
        }
        if self.threads == Some(0) {
            return Err(ConfigError::Invalid(
                "threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
