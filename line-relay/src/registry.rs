//! The live set of connected peers.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::Mutex;

use crate::peer::{Peer, PeerId};

/// Shared by every connection handler. The lock is only held to insert,
/// remove or clone handles; nothing is written to a socket while holding it.
#[derive(Debug)]
pub struct Registry {
    peers: Mutex<HashMap<PeerId, Peer>>,
    next_id: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> PeerId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn register(&self, peer: Peer) {
        let mut peers = self.peers.lock().await;
        peers.insert(peer.id(), peer);
    }

    /// Removes the peer if it is still registered. Removing twice is a no-op.
    pub async fn unregister(&self, id: PeerId) -> Option<Peer> {
        let mut peers = self.peers.lock().await;
        peers.remove(&id)
    }

    /// Point-in-time copy of the registered peers, in no particular order.
    pub async fn snapshot(&self) -> Vec<Peer> {
        let peers = self.peers.lock().await;
        peers.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.lock().await.is_empty()
    }
}
