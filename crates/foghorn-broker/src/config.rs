//! Broker tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the broker task and its clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Capacity of the command queue feeding the broker task. Publishers
    /// wait for space here when the broker is busy.
    #[serde(default = "default_command_queue")]
    pub command_queue: usize,

    /// Frames buffered per client between dispatch and the socket writer.
    #[serde(default = "default_client_queue")]
    pub client_queue: usize,

    /// Seconds between heartbeat pings. Minimum effective value is 1.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Seconds a single frame write may take before the client is
    /// dropped. Minimum effective value is 1.
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,

    /// Maximum simultaneously registered clients. `None` is unlimited.
    #[serde(default)]
    pub max_clients: Option<usize>,
}

fn default_command_queue() -> usize {
    64
}

fn default_client_queue() -> usize {
    64
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_write_timeout_secs() -> u64 {
    2
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            command_queue: default_command_queue(),
            client_queue: default_client_queue(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            max_clients: None,
        }
    }
}

impl BrokerConfig {
    /// Heartbeat period as a `Duration`, clamped to at least one second.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Write deadline as a `Duration`, clamped to at least one second.
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs.max(1))
    }
}
