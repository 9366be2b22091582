//! Onion transport.
//!
//! Outbound connections go through a local Tor SOCKS4a proxy; inbound
//! connections arrive on a local listener that the Tor daemon's hidden
//! service configuration forwards to. All connections go through Tor, there
//! is no clearnet fallback.

mod connection;
mod dialer;
mod listener;

pub use connection::{socks4a_request, AsyncStream, OnionConnection, PeerStream, SocksConfig};
pub use dialer::{Dialer, SocksDialer};
pub use listener::OnionListener;

/// Default SOCKS proxy port for Tor.
pub const DEFAULT_SOCKS_PORT: u16 = 9050;

/// Port requested from the proxy for every onion, and the default local
/// listening port.
pub const DEFAULT_REMOTE_PORT: u16 = 3141;
