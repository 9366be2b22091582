//! Inbound listener.
//!
//! The onion service itself is configured in the Tor daemon and forwards to
//! this local socket.

use crate::error::{Error, Result};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

/// A bound local listener receiving onion traffic.
pub struct OnionListener {
    listener: TcpListener,
}

impl OnionListener {
    /// Bind the local listener.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Transport(format!("failed to bind listener on {}: {}", addr, e)))?;

        tracing::info!(%addr, "Bound local listener");

        Ok(Self { listener })
    }

    /// Accept an incoming connection.
    pub async fn accept(&self) -> Result<TcpStream> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| Error::Transport(format!("accept failed: {}", e)))?;

        tracing::debug!(?addr, "Accepted incoming connection");

        Ok(stream)
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_and_accept() {
        let listener = OnionListener::bind("127.0.0.1:0".parse().expect("addr"))
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let client = tokio::spawn(async move { TcpStream::connect(addr).await });
        listener.accept().await.expect("accept");
        client.await.expect("join").expect("connect");
    }

    #[tokio::test]
    async fn test_bind_conflict_fails() {
        let first = OnionListener::bind("127.0.0.1:0".parse().expect("addr"))
            .await
            .expect("bind");
        let addr = first.local_addr().expect("local addr");
        assert!(OnionListener::bind(addr).await.is_err());
    }
}
