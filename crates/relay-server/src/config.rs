//! Server configuration.

use std::time::Duration;

use relay_settings::RelaySettings;

use crate::transport::TransportConfig;

/// Configuration for a [`RelayServer`](crate::server::RelayServer).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// SSE heartbeat, write deadline and buffering.
    pub transport: TransportConfig,
    /// How long shutdown waits for the server task.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            ..Self::from(&RelaySettings::default())
        }
    }
}

impl From<&RelaySettings> for ServerConfig {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            transport: TransportConfig::from(&settings.stream),
            shutdown_timeout: Duration::from_millis(settings.server.shutdown_timeout_ms),
        }
    }
}

impl ServerConfig {
    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
