//! Node configuration.

use crate::protocol::{DEFAULT_IO_TIMEOUT, INBOUND_PAYLOAD_LIMIT, PULL_PAYLOAD_LIMIT};
use crate::storage::DatabaseConfig;
use crate::tor::{SocksConfig, DEFAULT_REMOTE_PORT, DEFAULT_SOCKS_PORT};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

/// Durations are configured as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Everything a running node needs besides its identity and store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Local SOCKS4a proxy.
    pub socks_addr: SocketAddr,
    /// Destination port requested from the proxy for every onion.
    pub remote_port: u16,
    /// Local address the onion service forwards to.
    pub listen_addr: SocketAddr,
    /// Deadline for every individual read or write.
    #[serde(with = "duration_secs")]
    pub io_timeout: Duration,
    /// Period of the resync scheduler.
    #[serde(with = "duration_secs")]
    pub resync_interval: Duration,
    /// Inbound connections handled at once; further accepts wait.
    pub max_inbound_connections: usize,
    /// Contacts pulled at once during a resync sweep.
    pub max_concurrent_pulls: usize,
    /// Triggers in flight at once during a fan-out.
    pub max_concurrent_triggers: usize,
    /// Budget for one contact's pull, merge and follow-up work.
    #[serde(with = "duration_secs")]
    pub peer_task_timeout: Duration,
    /// Payload ceiling for frames read by the server side.
    pub inbound_payload_limit: u32,
    /// Payload ceiling for frames read while pulling.
    pub pull_payload_limit: u32,
    /// Retry a failed authentication as an anonymous, public-only pull.
    pub allow_unauthenticated_fallback: bool,
    /// Storage location.
    pub database: DatabaseConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            socks_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_SOCKS_PORT)),
            remote_port: DEFAULT_REMOTE_PORT,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_REMOTE_PORT)),
            io_timeout: DEFAULT_IO_TIMEOUT,
            resync_interval: Duration::from_secs(5 * 60),
            max_inbound_connections: 64,
            max_concurrent_pulls: 16,
            max_concurrent_triggers: 8,
            peer_task_timeout: Duration::from_secs(5 * 60),
            inbound_payload_limit: INBOUND_PAYLOAD_LIMIT,
            pull_payload_limit: PULL_PAYLOAD_LIMIT,
            allow_unauthenticated_fallback: true,
            database: DatabaseConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Dialer settings derived from this config.
    pub fn socks_config(&self) -> SocksConfig {
        SocksConfig {
            socks_addr: self.socks_addr,
            remote_port: self.remote_port,
            timeout: self.io_timeout,
        }
    }
}
