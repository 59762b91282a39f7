//! Connection Configuration
//!
//! Immutable TCP connection parameters shared by every hardware peer of the
//! station. A config is constructed once per connect attempt and never
//! mutated; the field defaults are the values the line runs with.

use crate::{Result, StationError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Connection parameters for one TCP peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Peer IP address
    pub ip: String,

    /// Peer TCP port (default 502, the PLC register port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect timeout (milliseconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Per-operation receive timeout (milliseconds)
    #[serde(default = "default_io_timeout")]
    pub receive_timeout_ms: u64,

    /// Per-operation send timeout (milliseconds)
    #[serde(default = "default_io_timeout")]
    pub send_timeout_ms: u64,

    /// Liveness probe readability timeout (milliseconds)
    #[serde(default = "default_io_timeout")]
    pub request_status_timeout_ms: u64,

    /// Maximum reconnect retry counter value for one reconnect cycle
    #[serde(default = "default_retry_count")]
    pub reconnect_retry_count: u32,

    /// Base delay between reconnect attempts; attempt `n` waits `n` times this
    #[serde(default = "default_retry_delay")]
    pub reconnect_retry_delay_ms: u64,

    /// TCP keep-alive idle time before the first probe (seconds)
    #[serde(default = "default_keep_alive_time")]
    pub tcp_keep_alive_time_s: u64,

    /// TCP keep-alive probe interval (seconds)
    #[serde(default = "default_keep_alive_interval")]
    pub tcp_keep_alive_interval_s: u64,

    /// TCP keep-alive probe count before the OS drops the link
    #[serde(default = "default_keep_alive_retry_count")]
    pub tcp_keep_alive_retry_count: u32,

    /// Whether to enable OS-level keep-alive on the socket
    #[serde(default = "default_true")]
    pub keep_alive_enable: bool,
}

fn default_port() -> u16 {
    502
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_io_timeout() -> u64 {
    1000
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_keep_alive_time() -> u64 {
    2
}

fn default_keep_alive_interval() -> u64 {
    1
}

fn default_keep_alive_retry_count() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

impl ConnectionConfig {
    /// Create a config for the given peer with the station defaults
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            connect_timeout_ms: default_connect_timeout(),
            receive_timeout_ms: default_io_timeout(),
            send_timeout_ms: default_io_timeout(),
            request_status_timeout_ms: default_io_timeout(),
            reconnect_retry_count: default_retry_count(),
            reconnect_retry_delay_ms: default_retry_delay(),
            tcp_keep_alive_time_s: default_keep_alive_time(),
            tcp_keep_alive_interval_s: default_keep_alive_interval(),
            tcp_keep_alive_retry_count: default_keep_alive_retry_count(),
            keep_alive_enable: default_true(),
        }
    }

    /// Parse a config from a JSON document, filling omitted fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ConnectionConfig = serde_json::from_str(json)
            .map_err(|e| StationError::Configuration(e.to_string()))?;
        Ok(config)
    }

    /// Resolve the peer socket address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.ip, self.port)
            .parse()
            .map_err(|e| {
                StationError::Configuration(format!(
                    "invalid address {}:{}: {}",
                    self.ip, self.port, e
                ))
            })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn request_status_timeout(&self) -> Duration {
        Duration::from_millis(self.request_status_timeout_ms)
    }

    pub fn reconnect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_retry_delay_ms)
    }
}
