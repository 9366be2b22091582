//! Trigger fan-out.
//!
//! A content change is resolved to the circles it belongs to, the circles to
//! contact onions, and each onion gets a TRIGGER on its own connection. The
//! trigger carries no content; the receiver pulls back. Failures are logged
//! and dropped, the next resync covers them.

use super::engine::SyncEngine;
use crate::error::Result;
use crate::identity::OnionAddress;
use crate::logging::RedactedOnion;
use crate::storage::{Circle, Repository};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;

/// Onions to notify for `circles`: deduplicated, never ourselves.
pub fn resolve_targets(
    store: &dyn Repository,
    circles: &[Circle],
    own: &OnionAddress,
) -> Result<BTreeSet<OnionAddress>> {
    let mut targets = BTreeSet::new();
    for circle in circles {
        for contact in store.circle_contacts(circle)? {
            if &contact.onion != own {
                targets.insert(contact.onion);
            }
        }
    }
    Ok(targets)
}

impl SyncEngine {
    /// Notify every member of `circles`.
    ///
    /// "Public" reaches every contact.
    pub async fn trigger_circles(
        self: &Arc<Self>,
        circles: &[Circle],
    ) -> Result<JoinHandle<usize>> {
        let targets = {
            let store = self.store().lock().await;
            resolve_targets(&*store, circles, self.onion())?
        };
        Ok(self.trigger_onions(targets))
    }

    /// Send a TRIGGER to each onion in the background.
    ///
    /// The handle resolves to the number of peers that acknowledged.
    pub fn trigger_onions(
        self: &Arc<Self>,
        onions: impl IntoIterator<Item = OnionAddress>,
    ) -> JoinHandle<usize> {
        let own = self.onion().clone();
        let targets: BTreeSet<OnionAddress> = onions.into_iter().filter(|o| *o != own).collect();
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            if targets.is_empty() {
                return 0;
            }
            tracing::debug!(peers = targets.len(), "Triggering peers");

            let permits = Arc::new(Semaphore::new(engine.config().max_concurrent_triggers.max(1)));
            let mut tasks = JoinSet::new();
            for target in targets {
                let engine = Arc::clone(&engine);
                let permits = Arc::clone(&permits);
                let span = tracing::debug_span!("trigger", peer = %RedactedOnion(target.as_str()));
                tasks.spawn(
                    async move {
                        let _permit = permits.acquire_owned().await.ok()?;
                        match engine.trigger_one(&target).await {
                            Ok(()) => Some(()),
                            Err(e) => {
                                tracing::warn!(error = %e, "Trigger not delivered");
                                None
                            }
                        }
                    }
                    .instrument(span),
                );
            }

            let mut delivered = 0;
            while let Some(result) = tasks.join_next().await {
                if let Ok(Some(())) = result {
                    delivered += 1;
                }
            }
            tracing::debug!(delivered, "Trigger fan-out finished");
            delivered
        })
    }

    /// Dial, authenticate and TRIGGER one peer.
    pub async fn trigger_one(&self, target: &OnionAddress) -> Result<()> {
        let client = self.dial_authenticated(target).await?;
        client.trigger().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::generate_identity;
    use crate::storage::{ContactStatus, Database, PUBLIC_CIRCLE};

    fn onion(s: &str) -> OnionAddress {
        OnionAddress::from_string(s).expect("valid onion")
    }

    fn setup() -> (Database, OnionAddress) {
        let db = Database::open_in_memory().expect("db");
        let me = generate_identity().expect("identity");
        let pem = me.to_pem().expect("pem");
        db.store_identity_pem(me.onion_address(), &pem).expect("store");
        (db, me.onion_address().clone())
    }

    #[test]
    fn test_public_resolves_to_every_contact() {
        let (db, me) = setup();
        db.add_contact(&onion("aaaaaaaaaaaaaaaa.onion"), "a", ContactStatus::Success, "")
            .expect("add");
        db.add_contact(&onion("bbbbbbbbbbbbbbbb.onion"), "b", ContactStatus::Open, "")
            .expect("add");
        let public = db.circle_by_name(PUBLIC_CIRCLE).expect("q").expect("public");

        let targets = resolve_targets(&db, &[public], &me).expect("resolve");
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn test_targets_deduplicated_and_exclude_self() {
        let (db, me) = setup();
        let a = db
            .add_contact(&onion("aaaaaaaaaaaaaaaa.onion"), "a", ContactStatus::Success, "")
            .expect("add");
        let b = db
            .add_contact(&onion("bbbbbbbbbbbbbbbb.onion"), "b", ContactStatus::Success, "")
            .expect("add");
        let first = db.promote_to_success(&a).expect("circle");
        db.add_contact_to_circle(first.id, b.id).expect("member");
        let second = db.promote_to_success(&b).expect("circle");
        // Our own onion as a contact is never triggered.
        let own = db.add_contact(&me, "me", ContactStatus::Success, "").expect("add");
        db.add_contact_to_circle(second.id, own.id).expect("member");

        let targets = resolve_targets(&db, &[first, second], &me).expect("resolve");
        assert_eq!(
            targets.into_iter().collect::<Vec<_>>(),
            vec![a.onion, b.onion]
        );
    }

    #[test]
    fn test_empty_circle_resolves_to_nothing() {
        let (db, me) = setup();
        let circle = db
            .create_circle("friends", crate::storage::CircleCreator::User)
            .expect("circle");
        assert!(resolve_targets(&db, &[circle], &me).expect("resolve").is_empty());
    }
}
