//! Configuration module for the rttperf server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::message::{EFFECTIVE_SIZE, MAX_MESSAGE_SIZE};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Transport the server listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
}

/// How replies are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Replies are marked as server-originated.
    Server,
    /// Requests are sent back unmodified.
    Bridge,
}

/// Readiness multiplexing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MuxType {
    /// Kernel event queue (epoll/kqueue via mio).
    Queue,
    /// poll(2) over the full descriptor set.
    Scan,
}

/// Command-line arguments for the benchmark server
#[derive(Parser, Debug, Default)]
#[command(name = "rttperf")]
#[command(version = "0.1.0")]
#[command(about = "Server side of a network latency/throughput benchmark", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to serve (repeatable, e.g. -l 0.0.0.0:11111 -l 224.4.4.4:11112)
    #[arg(short = 'l', long)]
    pub listen: Vec<String>,

    /// Transport protocol
    #[arg(short = 'p', long, value_enum)]
    pub transport: Option<Transport>,

    /// Reply mode
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Readiness multiplexer
    #[arg(long, value_enum)]
    pub mux: Option<MuxType>,

    /// Interface address for multicast group membership
    #[arg(long)]
    pub mc_rx_if: Option<Ipv4Addr>,

    /// Reply to the sender even on multicast sockets
    #[arg(long)]
    pub force_unicast_reply: bool,

    /// Set TCP_NODELAY on accepted connections
    #[arg(long, value_name = "BOOL")]
    pub tcp_nodelay: Option<bool>,

    /// Readiness wait timeout in milliseconds (0 = wait forever)
    #[arg(long)]
    pub poll_timeout_ms: Option<u64>,

    /// Receive ring size per socket in bytes
    #[arg(long)]
    pub ring_capacity: Option<usize>,

    /// Largest accepted message in bytes, header included
    #[arg(long)]
    pub max_message_size: Option<usize>,

    /// Maximum active connections per listener
    #[arg(long)]
    pub max_active_fds: Option<usize>,

    /// Log a line every N received messages (0 = off)
    #[arg(long)]
    pub activity: Option<u64>,

    /// Detect sequence gaps per peer
    #[arg(short = 'g', long)]
    pub detect_gaps: bool,

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
    pub buffers: BufferConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: Vec<String>,
    #[serde(default = "default_transport")]
    pub transport: Transport,
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default = "default_mux")]
    pub mux: MuxType,
    pub mc_rx_if: Option<Ipv4Addr>,
    #[serde(default)]
    pub force_unicast_reply: bool,
    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_max_active_fds")]
    pub max_active_fds: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            transport: default_transport(),
            mode: default_mode(),
            mux: default_mux(),
            mc_rx_if: None,
            force_unicast_reply: false,
            tcp_nodelay: default_tcp_nodelay(),
            poll_timeout_ms: default_poll_timeout_ms(),
            max_active_fds: default_max_active_fds(),
        }
    }
}

/// Receive buffer configuration
#[derive(Debug, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            ring_capacity: default_ring_capacity(),
            max_message_size: default_max_message_size(),
        }
    }
}

/// Per-message policy configuration
#[derive(Debug, Deserialize, Default)]
pub struct PolicyConfig {
    #[serde(default)]
    pub activity: u64,
    #[serde(default)]
    pub detect_gaps: bool,
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

fn default_listen() -> Vec<String> {
    vec!["0.0.0.0:11111".to_string()]
}

fn default_transport() -> Transport {
    Transport::Udp
}

fn default_mode() -> Mode {
    Mode::Server
}

fn default_mux() -> MuxType {
    MuxType::Queue
}

fn default_tcp_nodelay() -> bool {
    true
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_max_active_fds() -> usize {
    1024
}

fn default_ring_capacity() -> usize {
    2 * MAX_MESSAGE_SIZE
}

fn default_max_message_size() -> usize {
    MAX_MESSAGE_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: Vec<SocketAddr>,
    pub transport: Transport,
    pub mode: Mode,
    pub mux: MuxType,
    pub mc_rx_if: Ipv4Addr,
    pub force_unicast_reply: bool,
    pub tcp_nodelay: bool,
    pub poll_timeout: Option<Duration>,
    pub ring_capacity: usize,
    pub max_message_size: usize,
    pub max_active_fds: usize,
    pub activity: u64,
    pub detect_gaps: bool,
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
        let listen_raw = if cli.listen.is_empty() {
            toml_config.server.listen
        } else {
            cli.listen
        };
        let listen = listen_raw
            .iter()
            .map(|s| {
                s.parse::<SocketAddr>()
                    .map_err(|_| ConfigError::InvalidAddress(s.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let poll_timeout_ms = cli
            .poll_timeout_ms
            .unwrap_or(toml_config.server.poll_timeout_ms);

        let config = Config {
            listen,
            transport: cli.transport.unwrap_or(toml_config.server.transport),
            mode: cli.mode.unwrap_or(toml_config.server.mode),
            mux: cli.mux.unwrap_or(toml_config.server.mux),
            mc_rx_if: cli
                .mc_rx_if
                .or(toml_config.server.mc_rx_if)
                .unwrap_or(Ipv4Addr::UNSPECIFIED),
            force_unicast_reply: cli.force_unicast_reply
                || toml_config.server.force_unicast_reply,
            tcp_nodelay: cli.tcp_nodelay.unwrap_or(toml_config.server.tcp_nodelay),
            poll_timeout: (poll_timeout_ms > 0).then(|| Duration::from_millis(poll_timeout_ms)),
            ring_capacity: cli
                .ring_capacity
                .unwrap_or(toml_config.buffers.ring_capacity),
            max_message_size: cli
                .max_message_size
                .unwrap_or(toml_config.buffers.max_message_size),
            max_active_fds: cli
                .max_active_fds
                .unwrap_or(toml_config.server.max_active_fds),
            activity: cli.activity.unwrap_or(toml_config.policy.activity),
            detect_gaps: cli.detect_gaps || toml_config.policy.detect_gaps,
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
        if self.listen.is_empty() {
            return Err(ConfigError::Invalid("no listen address".to_string()));
        }
        if let Some(addr) = self.listen.iter().find(|a| !a.is_ipv4()) {
            return Err(ConfigError::InvalidAddress(format!(
                "{addr} (only IPv4 is supported)"
            )));
        }
        if self.max_message_size < EFFECTIVE_SIZE || self.max_message_size > MAX_MESSAGE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "max_message_size must be within {EFFECTIVE_SIZE}..={MAX_MESSAGE_SIZE}"
            )));
        }
        if self.ring_capacity < self.max_message_size {
            return Err(ConfigError::Invalid(
                "ring_capacity must be at least max_message_size".to_string(),
            ));
        }
        if self.max_active_fds == 0 {
            return Err(ConfigError::Invalid(
                "max_active_fds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidAddress(String),
    Invalid(String),
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
            ConfigError::InvalidAddress(addr) => write!(f, "Invalid listen address '{addr}'"),
            ConfigError::Invalid(reason) => write!(f, "Invalid configuration: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}
