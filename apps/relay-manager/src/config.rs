use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

const ENV_PREFIX: &str = "RELAY_MANAGER";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid bind address {addr}: {source}")]
    BindAddr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },
}

/// Process configuration, read from `RELAY_MANAGER_*` environment variables
/// (nested keys use `__`).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Whether this deployment terminates extension websockets. When off,
    /// new sessions are told to use the SSE/REST fallback.
    #[serde(default)]
    pub websocket_enabled: bool,
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
    #[serde(default = "default_sse_keepalive_secs")]
    pub sse_keepalive_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            log_filter: default_log_filter(),
            websocket_enabled: false,
            stream_buffer: default_stream_buffer(),
            sse_keepalive_secs: default_sse_keepalive_secs(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let cfg = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<AppConfig>()?;
        Ok(cfg.normalize())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr
            .parse()
            .map_err(|source| ConfigError::BindAddr {
                addr: self.bind_addr.clone(),
                source,
            })
    }

    pub fn sse_keepalive(&self) -> Duration {
        Duration::from_secs(self.sse_keepalive_secs.max(1))
    }

    fn normalize(mut self) -> Self {
        self.bind_addr = Self::normalize_or(self.bind_addr, default_bind_addr);
        self.log_filter = Self::normalize_or(self.log_filter, default_log_filter);
        self.stream_buffer = self.stream_buffer.max(1);
        self
    }

    fn normalize_or(value: String, fallback: fn() -> String) -> String {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            fallback()
        } else {
            trimmed.to_string()
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_log_filter() -> String {
    "info,relay_manager=debug".to_string()
}

fn default_stream_buffer() -> usize {
    128
}

fn default_sse_keepalive_secs() -> u64 {
    15
}
