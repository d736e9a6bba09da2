//! Node Entry Store
//!
//! Two-level locking: the map lock guards which identities exist, and each
//! entry has its own lock guarding the record and every datapath call made
//! about it.
//!
//! 1. Acquire the map lock to look up or create the entry.
//! 2. Acquire the entry lock while the map lock is still held, so the entry
//!    cannot be removed or replaced in between.
//! 3. Release the map lock to unblock work on other nodes.
//! 4. Mutate the record and notify handlers.
//! 5. Release the entry lock.
//!
//! The map lock must never be acquired while an entry lock is held.

use fabric_core::{Identity, Node};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) type NodeEntry = Arc<Mutex<Node>>;
pub(crate) type NodeMap = HashMap<Identity, NodeEntry>;

#[derive(Default)]
pub(crate) struct NodeStore {
    entries: RwLock<NodeMap>,
}

impl NodeStore {
    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, NodeMap> {
        self.entries.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, NodeMap> {
        self.entries.write().await
    }

    /// Lock the entry of `identity`, or None if it does not exist.
    pub(crate) async fn lock(&self, identity: &Identity) -> Option<OwnedMutexGuard<Node>> {
        let entries = self.entries.read().await;
        let entry = entries.get(identity)?.clone();
        let guard = entry.lock_owned().await;
        drop(entries);
        Some(guard)
    }

    pub(crate) async fn contains(&self, identity: &Identity) -> bool {
        self.entries.read().await.contains_key(identity)
    }

    pub(crate) async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub(crate) async fn identities(&self) -> Vec<Identity> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Point-in-time copy of every record. Entry locks are taken one at a
    /// time and only for the duration of the copy.
    pub(crate) async fn snapshot(&self) -> HashMap<Identity, Node> {
        let entries = self.entries.read().await;
        let mut nodes = HashMap::with_capacity(entries.len());
        for (identity, entry) in entries.iter() {
            let node = entry.lock().await;
            nodes.insert(identity.clone(), node.clone());
        }
        nodes
    }
}

/// Insert a new entry for `node` and return it already locked.
pub(crate) async fn insert_locked(
    entries: &mut NodeMap,
    identity: Identity,
    node: Node,
) -> OwnedMutexGuard<Node> {
    let entry = Arc::new(Mutex::new(node));
    let guard = entry.clone().lock_owned().await;
    entries.insert(identity, entry);
    guard
}
