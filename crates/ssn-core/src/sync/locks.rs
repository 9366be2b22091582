//! Per-identity serialisation of pull and merge.

use crate::identity::OnionAddress;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async lock per remote onion.
///
/// Two tasks syncing the same identity run one after the other so the
/// hash-keyed upsert never races itself; different identities proceed in
/// parallel.
#[derive(Default)]
pub struct PeerLocks {
    locks: Mutex<HashMap<OnionAddress, Arc<AsyncMutex<()>>>>,
}

impl PeerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `onion`.
    pub async fn lock(&self, onion: &OnionAddress) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            locks.entry(onion.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}
