//! Dialing seam between the sync engine and the network.

use super::connection::{OnionConnection, SocksConfig};
use crate::error::Result;
use crate::identity::OnionAddress;
use async_trait::async_trait;

/// Opens connections to peers by onion address.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a fresh connection to `target`.
    async fn dial(&self, target: &OnionAddress) -> Result<OnionConnection>;
}

/// Dials through the local SOCKS4a proxy.
#[derive(Debug, Clone, Default)]
pub struct SocksDialer {
    config: SocksConfig,
}

impl SocksDialer {
    pub fn new(config: SocksConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Dialer for SocksDialer {
    async fn dial(&self, target: &OnionAddress) -> Result<OnionConnection> {
        OnionConnection::connect(&self.config, target).await
    }
}
