//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the Lattice server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections (admission ceiling).
    pub max_connections: usize,
    /// Capacity of each per-connection mailbox.
    pub mailbox_capacity: usize,
    /// Capacity of the dispatch intent queue.
    pub intent_queue_capacity: usize,
    /// Interval between server Ping frames, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close the connection after this long without a Pong, in seconds.
    pub heartbeat_timeout_secs: u64,
    /// Bounded deadline for one transport write, in seconds.
    pub write_timeout_secs: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Grace period for tasks to exit on shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
    /// Default graph node limit for queries.
    pub default_graph_limit: u32,
    /// Usage broadcast interval in milliseconds.
    pub usage_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 100,
            mailbox_capacity: 256,
            intent_queue_capacity: 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            write_timeout_secs: 10,
            max_message_size: 10 * 1024 * 1024, // 10 MB
            shutdown_timeout_secs: 30,
            default_graph_limit: 1000,
            usage_interval_ms: 500,
        }
    }
}

impl ServerConfig {
    /// Interval between Ping frames.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Pong deadline.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Transport write deadline.
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Shutdown grace period.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
