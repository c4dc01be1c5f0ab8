//! Server configuration.

use foghorn_broker::BrokerConfig;
use serde::{Deserialize, Serialize};

use crate::options::SseOptions;

/// Configuration for an [`SseServer`](crate::SseServer).
///
/// Every field has a default, so a config file only needs the values it
/// overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    #[serde(default)]
    pub port: u16,
    /// Stream preamble policy.
    #[serde(default)]
    pub sse: SseOptions,
    /// Broker tuning passed through to the fan-out actor.
    #[serde(default)]
    pub broker: BrokerConfig,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
            sse: SseOptions::default(),
            broker: BrokerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// The `host:port` string handed to the TCP listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
