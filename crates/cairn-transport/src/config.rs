//! Transport configuration.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the socket transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Local address the listener binds to. Port 0 picks an ephemeral port.
    pub bind: SocketAddr,

    /// Addresses of the other participants; `write` broadcasts to all of
    /// them.
    pub peers: Vec<SocketAddr>,

    /// Additional connect attempts per peer before the failure is fatal.
    pub connect_retries: u32,

    /// Pause between connect attempts.
    pub retry_delay: Duration,

    /// Read buffer size per inbound connection, in bytes.
    pub buffer_size: usize,

    /// Capacity of each per-peer outbound frame queue. A full queue blocks
    /// the writer rather than buffering without bound.
    pub outbound_queue_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            peers: Vec::new(),
            connect_retries: 20,
            retry_delay: Duration::from_millis(50),
            buffer_size: 64 * 1024,
            outbound_queue_capacity: 1024,
        }
    }
}

impl TransportConfig {
    /// A loopback configuration with no peers, for single-process runs.
    pub fn local() -> Self {
        Self::default()
    }

    pub fn with_peers(mut self, peers: Vec<SocketAddr>) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_ephemeral_loopback_port() {
        let config = TransportConfig::default();
        assert!(config.bind.ip().is_loopback());
        assert_eq!(config.bind.port(), 0);
        assert_eq!(config.connect_retries, 20);
    }
}
