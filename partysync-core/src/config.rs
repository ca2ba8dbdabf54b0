use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub rooms: RoomsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Room lifecycle and health timings. All durations are milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// Host silence before the room is declared host-disconnected.
    pub host_timeout_ms: i64,
    /// Grace period after host disconnection before the room expires.
    pub reconnection_window_ms: i64,
    /// Interval of the health monitor's liveness scan.
    pub health_check_interval_ms: u64,
    /// Interval of the inactivity sweeper.
    pub cleanup_interval_ms: u64,
    /// Per-connection inactivity close.
    pub client_idle_timeout_ms: u64,
    /// Outbound frames buffered per connection before sends are dropped.
    pub max_outbound_backlog: usize,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            host_timeout_ms: 600_000,
            reconnection_window_ms: 300_000,
            health_check_interval_ms: 10_000,
            cleanup_interval_ms: 30_000,
            client_idle_timeout_ms: 600_000,
            max_outbound_backlog: 1024,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (PARTYSYNC_SERVER_HOST, etc.)
        builder = builder.add_source(
            Environment::with_prefix("PARTYSYNC")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Get HTTP listen address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }
}
