//! In-process network for multi-node tests.
//!
//! Every node's dialer looks the target up in a shared registry and serves
//! the connection with the target's own engine over a `tokio::io::duplex`
//! pipe, so whole exchanges run without Tor or sockets.

#![allow(dead_code)]

use async_trait::async_trait;
use ssn_core::identity::{generate_identity, OnionAddress};
use ssn_core::storage::{Circle, Contact, ContactStatus, Database, Repository, SharedRepository};
use ssn_core::sync::{serve_connection, SyncEngine};
use ssn_core::tor::{Dialer, OnionConnection};
use ssn_core::{Error, NodeConfig, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::duplex;
use tokio::sync::Mutex;

type Registry = Arc<RwLock<HashMap<OnionAddress, Arc<SyncEngine>>>>;

/// Dials by handing one end of a pipe to the target's server task.
pub struct LoopbackDialer {
    registry: Registry,
}

#[async_trait]
impl Dialer for LoopbackDialer {
    async fn dial(&self, target: &OnionAddress) -> Result<OnionConnection> {
        let engine = self
            .registry
            .read()
            .expect("registry lock")
            .get(target)
            .cloned()
            .ok_or_else(|| Error::ProxyRejected(target.to_string()))?;
        let (client, server) = duplex(64 * 1024);
        tokio::spawn(serve_connection(engine, server));
        Ok(OnionConnection::new(Box::new(client), target.clone()))
    }
}

/// A set of nodes that can reach each other.
#[derive(Default)]
pub struct Network {
    registry: Registry,
}

pub fn test_config() -> NodeConfig {
    NodeConfig {
        io_timeout: Duration::from_secs(5),
        peer_task_timeout: Duration::from_secs(20),
        ..NodeConfig::default()
    }
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a node with a fresh identity and an in-memory store.
    pub fn add_node(&self) -> Arc<SyncEngine> {
        self.add_node_with(test_config())
    }

    pub fn add_node_with(&self, config: NodeConfig) -> Arc<SyncEngine> {
        let identity = generate_identity().expect("identity");
        let db = Database::open_in_memory().expect("database");
        let pem = identity.to_pem().expect("pem");
        db.store_identity_pem(identity.onion_address(), &pem)
            .expect("store identity");

        let store: SharedRepository = Arc::new(Mutex::new(db));
        let dialer = Arc::new(LoopbackDialer {
            registry: Arc::clone(&self.registry),
        });
        let engine = Arc::new(SyncEngine::new(Arc::new(identity), store, dialer, config));

        self.registry
            .write()
            .expect("registry lock")
            .insert(engine.onion().clone(), Arc::clone(&engine));
        engine
    }

    /// Take a node off the network.
    pub fn remove(&self, onion: &OnionAddress) {
        self.registry.write().expect("registry lock").remove(onion);
    }
}

/// Add `other` to `node`'s contacts under `alias`.
pub async fn add_contact(
    node: &SyncEngine,
    other: &SyncEngine,
    alias: &str,
    status: ContactStatus,
) -> Contact {
    node.store()
        .lock()
        .await
        .add_contact(other.onion(), alias, status, "")
        .expect("add contact")
}

/// Mutual SUCCESS contacts, each with a circle named after the other.
pub async fn befriend(
    a: &SyncEngine,
    a_alias: &str,
    b: &SyncEngine,
    b_alias: &str,
) -> (Circle, Circle) {
    let b_in_a = add_contact(a, b, b_alias, ContactStatus::Success).await;
    let a_in_b = add_contact(b, a, a_alias, ContactStatus::Success).await;
    let a_circle = a.store().lock().await.promote_to_success(&b_in_a).expect("promote");
    let b_circle = b.store().lock().await.promote_to_success(&a_in_b).expect("promote");
    (a_circle, b_circle)
}

pub async fn public_circle(node: &SyncEngine) -> Circle {
    node.store()
        .lock()
        .await
        .circle_by_name(ssn_core::storage::PUBLIC_CIRCLE)
        .expect("query")
        .expect("public circle")
}

pub async fn contact(node: &SyncEngine, onion: &OnionAddress) -> Contact {
    node.store()
        .lock()
        .await
        .contact_by_onion(onion)
        .expect("query")
        .expect("contact exists")
}

/// Poll `check` until it holds or a few seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
