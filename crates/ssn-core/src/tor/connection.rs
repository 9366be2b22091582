//! Outbound connections to onion services through a SOCKS4a proxy.

use crate::error::{Error, Result};
use crate::identity::OnionAddress;
use crate::logging::RedactedOnion;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const SOCKS4_VERSION: u8 = 0x04;
const SOCKS4_CONNECT: u8 = 0x01;
const SOCKS4_GRANTED: u8 = 0x5a;
const SOCKS4_REJECTED: u8 = 0x5b;

/// 0.0.0.1: tells a SOCKS4a proxy to resolve the trailing hostname itself.
const SOCKS4A_PLACEHOLDER_IP: [u8; 4] = [0, 0, 0, 1];

const SOCKS4_REPLY_SIZE: usize = 8;

/// A byte stream a peer connection can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Type-erased peer stream.
pub type PeerStream = Box<dyn AsyncStream>;

/// Configuration for SOCKS connections.
#[derive(Debug, Clone)]
pub struct SocksConfig {
    /// SOCKS4a proxy address.
    pub socks_addr: SocketAddr,
    /// Destination port requested for every onion.
    pub remote_port: u16,
    /// Deadline for connecting and for each handshake read/write.
    pub timeout: Duration,
}

impl Default for SocksConfig {
    fn default() -> Self {
        Self {
            socks_addr: SocketAddr::from(([127, 0, 0, 1], super::DEFAULT_SOCKS_PORT)),
            remote_port: super::DEFAULT_REMOTE_PORT,
            timeout: crate::protocol::DEFAULT_IO_TIMEOUT,
        }
    }
}

/// A connection to a peer, tagged with the onion it was opened to.
pub struct OnionConnection {
    stream: PeerStream,
    peer: OnionAddress,
}

impl OnionConnection {
    /// Wrap an already-established stream.
    pub fn new(stream: PeerStream, peer: OnionAddress) -> Self {
        Self { stream, peer }
    }

    /// Connect to an onion service through the SOCKS4a proxy.
    ///
    /// No retries happen here.
    pub async fn connect(config: &SocksConfig, target: &OnionAddress) -> Result<Self> {
        let mut stream = timeout(config.timeout, TcpStream::connect(config.socks_addr))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| Error::Transport(format!("failed to connect to SOCKS proxy: {}", e)))?;

        socks4a_handshake(&mut stream, target, config.remote_port, config.timeout).await?;

        tracing::debug!(peer = %RedactedOnion(target.as_str()), "SOCKS4a connection granted");

        Ok(Self::new(Box::new(stream), target.clone()))
    }

    /// The onion this connection was opened to.
    pub fn peer(&self) -> &OnionAddress {
        &self.peer
    }

    /// Get mutable access to the underlying stream.
    pub fn stream_mut(&mut self) -> &mut PeerStream {
        &mut self.stream
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<()> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| Error::Transport(format!("shutdown failed: {}", e)))
    }
}

/// Build a SOCKS4a CONNECT request.
pub fn socks4a_request(target: &OnionAddress, port: u16) -> Vec<u8> {
    let host = target.as_str().as_bytes();
    let mut request = Vec::with_capacity(10 + host.len());
    request.push(SOCKS4_VERSION);
    request.push(SOCKS4_CONNECT);
    request.extend_from_slice(&port.to_be_bytes());
    request.extend_from_slice(&SOCKS4A_PLACEHOLDER_IP);
    request.push(0x00); // empty user id
    request.extend_from_slice(host);
    request.push(0x00);
    request
}

async fn socks4a_handshake<S>(
    stream: &mut S,
    target: &OnionAddress,
    port: u16,
    deadline: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = socks4a_request(target, port);
    timeout(deadline, stream.write_all(&request))
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(|e| Error::Transport(format!("SOCKS4a request failed: {}", e)))?;

    let mut reply = [0u8; SOCKS4_REPLY_SIZE];
    timeout(deadline, stream.read_exact(&mut reply))
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(|e| Error::Transport(format!("SOCKS4a reply failed: {}", e)))?;

    match reply[1] {
        SOCKS4_GRANTED => Ok(()),
        SOCKS4_REJECTED => Err(Error::ProxyRejected(target.to_string())),
        code => Err(Error::Transport(format!("SOCKS4a status {:#04x}", code))),
    }
}
