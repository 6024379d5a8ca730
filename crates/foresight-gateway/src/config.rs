//! Gateway configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{GatewayError, Result, DEFAULT_HOST, DEFAULT_PORT};

/// Main gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Seconds between heartbeat events
    pub heartbeat_interval_secs: u64,

    /// Seconds between SSE keep-alive comments
    pub sse_keep_alive_secs: u64,

    /// Events buffered per subscriber before it starts lagging
    pub event_buffer: usize,

    /// SQLite database holding suggestions and the fact corpus
    pub database_path: PathBuf,

    /// Engine configuration file (TOML); defaults apply when absent
    pub engine_config_path: Option<PathBuf>,

    /// Upper bound for `GET /suggestions/recent`
    pub max_recent: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            heartbeat_interval_secs: 30,
            sse_keep_alive_secs: 15,
            event_buffer: 256,
            database_path: PathBuf::from("foresight.db"),
            engine_config_path: None,
            max_recent: 100,
        }
    }
}

impl GatewayConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    pub fn with_engine_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.engine_config_path = Some(path.into());
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn sse_keep_alive(&self) -> Duration {
        Duration::from_secs(self.sse_keep_alive_secs)
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| GatewayError::InvalidConfig(format!("address {}:{}: {e}", self.host, self.port)))
    }

    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        if self.heartbeat_interval_secs == 0 {
            return Err(GatewayError::InvalidConfig("heartbeat_interval_secs must be positive".into()));
        }
        if self.event_buffer == 0 {
            return Err(GatewayError::InvalidConfig("event_buffer must be positive".into()));
        }
        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GatewayError::Serialization(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
