//! The node's sync engine.
//!
//! Holds everything a connection or background task needs: our identity,
//! the shared store, the dialer and the config. Client orchestration lives
//! here; the server, gossip and resync halves extend it in their own files.

use super::client::{PeerClient, PullReply};
use super::locks::PeerLocks;
use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::identity::{NodeIdentity, OnionAddress};
use crate::logging::RedactedOnion;
use crate::security_event;
use crate::storage::{Circle, Contact, ContactStatus, Post, ProfileField, SharedRepository};
use crate::tor::Dialer;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// What one contact's sync stored.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Whether the pull ran authenticated.
    pub authenticated: bool,
    /// Posts stored (new or updated).
    pub posts: usize,
    /// Profile fields received.
    pub profiles: usize,
    /// Comments that completed one of our threads and were published.
    pub completed_comments: usize,
}

/// Shared state of a running node.
pub struct SyncEngine {
    identity: Arc<NodeIdentity>,
    store: SharedRepository,
    dialer: Arc<dyn Dialer>,
    config: NodeConfig,
    locks: PeerLocks,
}

impl SyncEngine {
    pub fn new(
        identity: Arc<NodeIdentity>,
        store: SharedRepository,
        dialer: Arc<dyn Dialer>,
        config: NodeConfig,
    ) -> Self {
        Self {
            identity,
            store,
            dialer,
            config,
            locks: PeerLocks::new(),
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn onion(&self) -> &OnionAddress {
        self.identity.onion_address()
    }

    pub fn store(&self) -> &SharedRepository {
        &self.store
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Open a fresh client connection.
    pub async fn dial(&self, target: &OnionAddress) -> Result<PeerClient> {
        let conn = self.dialer.dial(target).await?;
        Ok(PeerClient::new(conn, self.config.io_timeout))
    }

    /// Dial and authenticate.
    pub async fn dial_authenticated(&self, target: &OnionAddress) -> Result<PeerClient> {
        let mut client = self.dial(target).await?;
        client.authenticate(&self.identity).await?;
        Ok(client)
    }

    /// Pull from one contact.
    ///
    /// A failed authentication falls back to an anonymous pull on a fresh
    /// connection when the config allows it; the peer then serves public
    /// content only. A successful authentication promotes the contact to
    /// SUCCESS.
    pub async fn pull_from_contact(&self, contact: &Contact) -> Result<(PullReply, bool)> {
        let since = self.store.lock().await.last_activity(contact)?;

        let mut client = self.dial(&contact.onion).await?;
        let authenticated = match client.authenticate(&self.identity).await {
            Ok(()) => true,
            Err(e) => {
                if e.is_security_event() {
                    security_event!(
                        peer = %RedactedOnion(contact.onion.as_str()),
                        error = %e,
                        "Authentication to contact failed"
                    );
                } else {
                    tracing::warn!(
                        peer = %RedactedOnion(contact.onion.as_str()),
                        error = %e,
                        "Authentication to contact failed"
                    );
                }
                if !self.config.allow_unauthenticated_fallback {
                    return Err(e);
                }
                client = self.dial(&contact.onion).await?;
                false
            }
        };

        if authenticated && contact.status != ContactStatus::Success {
            self.store.lock().await.promote_to_success(contact)?;
        }

        let reply = client.pull(since, self.config.pull_payload_limit).await?;
        Ok((reply, authenticated))
    }

    /// Pull, merge and complete threads for one contact.
    ///
    /// Serialised per onion, so concurrent syncs of the same contact never
    /// interleave their merges.
    pub async fn sync_contact(self: &Arc<Self>, contact: &Contact) -> Result<SyncOutcome> {
        let _guard = self.locks.lock(&contact.onion).await;

        let (reply, authenticated) = self.pull_from_contact(contact).await?;
        let stored = self
            .store
            .lock()
            .await
            .merge_pull(&contact.onion, &reply.posts, &reply.profiles)?;

        let completed = self.complete_comments(&stored).await?;

        Ok(SyncOutcome {
            authenticated,
            posts: stored.len(),
            profiles: reply.profiles.len(),
            completed_comments: completed,
        })
    }

    /// Publish pulled comments on threads we originated and tell the
    /// thread's circles. Comments published earlier do not trigger again.
    async fn complete_comments(self: &Arc<Self>, stored: &[Post]) -> Result<usize> {
        let mut circles: Vec<Circle> = Vec::new();
        let mut completed = 0;
        {
            let store = self.store.lock().await;
            for post in stored.iter().filter(|p| p.is_comment()) {
                let parent = match store.post_by_id(post.parent_id)? {
                    Some(parent) => parent,
                    None => continue,
                };
                if &parent.originator != self.onion() {
                    continue;
                }
                if store.publish_post(post.id)? {
                    completed += 1;
                    for circle in store.post_circles(post.id)? {
                        if !circles.iter().any(|c| c.id == circle.id) {
                            circles.push(circle);
                        }
                    }
                }
            }
        }

        if !circles.is_empty() {
            tracing::info!(completed, circles = circles.len(), "Comments completed local threads");
            // Fire and forget; delivery is best effort.
            let _ = self.trigger_circles(&circles).await?;
        }
        Ok(completed)
    }

    /// Ask `target` to add us as a contact.
    pub async fn send_contact_request(&self, target: &OnionAddress, message: &str) -> Result<()> {
        if target == self.onion() {
            return Err(Error::Protocol("refusing to send a contact request to ourselves".into()));
        }
        let client = self.dial(target).await?;
        client.send_contact_request(message, self.onion()).await?;
        tracing::info!(peer = %RedactedOnion(target.as_str()), "Contact request delivered");
        Ok(())
    }

    /// Author a post into `circle_ids` and notify those circles.
    pub async fn create_post(
        self: &Arc<Self>,
        message: &str,
        ttl: u8,
        circle_ids: &[i64],
    ) -> Result<(Post, JoinHandle<usize>)> {
        let (post, circles) = {
            let store = self.store.lock().await;
            let post = store.create_local_post(message, ttl, circle_ids)?;
            let circles = store.post_circles(post.id)?;
            (post, circles)
        };
        let handle = self.trigger_circles(&circles).await?;
        Ok((post, handle))
    }

    /// Comment on a stored post.
    ///
    /// Notifies the comment's circles (set when the parent is ours) and the
    /// parent's originator, who serves the comment onward once it pulls.
    pub async fn create_comment(
        self: &Arc<Self>,
        parent_id: i64,
        message: &str,
        ttl: u8,
    ) -> Result<(Post, JoinHandle<usize>)> {
        let (comment, mut targets) = {
            let store = self.store.lock().await;
            let comment = store.create_local_comment(parent_id, message, ttl)?;
            let mut targets = Vec::new();
            for circle in store.post_circles(comment.id)? {
                targets.extend(store.circle_contacts(&circle)?.into_iter().map(|c| c.onion));
            }
            (comment, targets)
        };
        if &comment.originator != self.onion() {
            targets.push(comment.originator.clone());
        }
        Ok((comment, self.trigger_onions(targets)))
    }

    /// Set one of our profile fields and notify the circles that can see it.
    pub async fn set_profile(
        self: &Arc<Self>,
        key: &str,
        value: &str,
        circle_ids: &[i64],
    ) -> Result<(ProfileField, JoinHandle<usize>)> {
        let (field, circles) = {
            let store = self.store.lock().await;
            let field = store.set_local_profile(key, value, circle_ids)?;
            let mut circles = Vec::new();
            for id in circle_ids {
                if let Some(circle) = store.circle_by_id(*id)? {
                    circles.push(circle);
                }
            }
            (field, circles)
        };
        let handle = self.trigger_circles(&circles).await?;
        Ok((field, handle))
    }
}
