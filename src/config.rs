//! Configuration types.

use std::time::Duration;

/// Built-in catalogue configuration.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Artificial per-task latency, to make queue/worker behavior visible
    /// in demos. Zero disables it.
    pub simulated_delay: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            simulated_delay: Duration::ZERO,
        }
    }
}

/// Remote worker connection configuration.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// WebSocket endpoint of the remote executor, e.g. `ws://host:port/ws`.
    pub endpoint: String,
    /// How long to wait for the handshake reply before giving up.
    pub handshake_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:9170/ws".to_string(),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

/// Peer executor endpoint configuration.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Bind address for the WebSocket server.
    pub bind_addr: String,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9170".to_string(),
        }
    }
}
