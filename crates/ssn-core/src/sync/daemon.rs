//! Inbound accept loop.
//!
//! The Tor daemon's onion service forwards to a local listener. Each
//! accepted connection is served on its own task, but only after a permit
//! is taken from a bounded pool: when the pool is exhausted the loop stops
//! accepting and the kernel backlog absorbs the rest.

use super::engine::SyncEngine;
use super::server::serve_connection;
use crate::error::Result;
use crate::tor::OnionListener;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

/// A bound listener plus the engine that serves it.
pub struct Daemon {
    engine: Arc<SyncEngine>,
    listener: OnionListener,
}

impl Daemon {
    /// Bind the configured listen address.
    ///
    /// This is the one failure a node cannot run without.
    pub async fn bind(engine: Arc<SyncEngine>) -> Result<Self> {
        let listener = OnionListener::bind(engine.config().listen_addr).await?;
        Ok(Self { engine, listener })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `shutdown` resolves, then abort in-flight handlers.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let limit = self.engine.config().max_inbound_connections.max(1);
        let permits = Arc::new(Semaphore::new(limit));
        let mut handlers = JoinSet::new();
        let mut next_id: u64 = 0;

        tracing::info!(
            addr = ?self.listener.local_addr().ok(),
            onion = %self.engine.onion(),
            max_connections = limit,
            "Daemon listening"
        );

        tokio::pin!(shutdown);

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                Some(_) = handlers.join_next(), if !handlers.is_empty() => continue,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let stream = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        continue;
                    }
                },
            };

            next_id += 1;
            let id = next_id;
            let engine = Arc::clone(&self.engine);
            handlers.spawn(
                async move {
                    let _permit = permit;
                    serve_connection(engine, stream).await;
                }
                .instrument(tracing::debug_span!("conn", id)),
            );
        }

        tracing::info!(in_flight = handlers.len(), "Daemon shutting down");
        handlers.shutdown().await;
        Ok(())
    }
}
