//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on (0 for auto-assign).
    pub port: u16,
    /// Upgrades are refused once this many connections are live.
    pub max_connections: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_capacity: usize,
    /// Inbound inactivity that closes a connection (ms).
    pub read_idle_timeout_ms: u64,
    /// Deadline for one outbound write (ms).
    pub write_timeout_ms: u64,
    /// Outbound silence before a ping is sent (ms).
    pub ping_interval_ms: u64,
    /// Timeout for out-of-band registry sends (ms).
    pub send_timeout_ms: u64,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Greeting sent in reply to `get_welcome`.
    pub welcome_message: String,
}

impl ServerConfig {
    /// Read-idle deadline.
    pub fn read_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.read_idle_timeout_ms)
    }

    /// Per-write deadline.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Ping interval.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Out-of-band send timeout.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            max_connections: 1000,
            outbound_queue_capacity: 256,
            read_idle_timeout_ms: 60_000,
            write_timeout_ms: 10_000,
            ping_interval_ms: 30_000,
            send_timeout_ms: 5_000,
            max_message_size: 1024 * 1024,
            welcome_message: "Welcome to Chime! Ask me anything and I will do my best to help."
                .into(),
        }
    }
}
