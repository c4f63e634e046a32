//! Sync peer bookkeeping.

use std::collections::HashSet;

use crate::types::PeerId;

/// State of headers-first synchronization.
///
/// Owned by the coordinator behind a single lock. At most one sync peer is
/// assigned at any time.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    /// Peer we are currently downloading headers from.
    sync_peer: Option<PeerId>,

    /// Unix time the current sync peer was assigned.
    sync_start: i64,

    /// Unix time of the last HEADERS message from the sync peer.
    last_headers_received: i64,

    /// Size of the last batch from the sync peer.
    last_batch_size: usize,

    /// Set once a partial batch arrives while our tip is recent.
    synced: bool,

    /// Peers already tried as sync peer since they connected.
    attempted: HashSet<PeerId>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sync_peer(&self) -> Option<PeerId> {
        self.sync_peer
    }

    pub fn has_sync_peer(&self) -> bool {
        self.sync_peer.is_some()
    }

    pub fn is_sync_peer(&self, peer: PeerId) -> bool {
        self.sync_peer == Some(peer)
    }

    /// Assign `peer`. Fails when another peer already holds the role.
    pub fn assign(&mut self, peer: PeerId, now: i64) -> bool {
        if self.sync_peer.is_some() {
            return false;
        }
        self.sync_peer = Some(peer);
        self.sync_start = now;
        self.last_headers_received = now;
        self.last_batch_size = 0;
        self.attempted.insert(peer);
        true
    }

    /// Release the sync peer. Returns who held it.
    pub fn clear(&mut self) -> Option<PeerId> {
        self.sync_start = 0;
        self.last_batch_size = 0;
        self.sync_peer.take()
    }

    /// Release the role only when `peer` holds it.
    pub fn clear_if(&mut self, peer: PeerId) -> bool {
        if self.is_sync_peer(peer) {
            self.clear();
            true
        } else {
            false
        }
    }

    /// Drop `peer` from the role after a disconnect or penalty. Also clears
    /// completion, so the next timer pass selects a new peer.
    pub fn release(&mut self, peer: PeerId) -> bool {
        if !self.clear_if(peer) {
            return false;
        }
        self.synced = false;
        true
    }

    pub fn record_headers(&mut self, now: i64, batch_size: usize) {
        self.last_headers_received = now;
        self.last_batch_size = batch_size;
    }

    pub fn sync_start(&self) -> i64 {
        self.sync_start
    }

    pub fn last_headers_received(&self) -> i64 {
        self.last_headers_received
    }

    pub fn last_batch_size(&self) -> usize {
        self.last_batch_size
    }

    /// Whether the sync peer has been silent longer than `timeout_secs`.
    pub fn is_stalled(&self, now: i64, timeout_secs: i64) -> bool {
        self.sync_peer.is_some() && !self.synced && now - self.last_headers_received > timeout_secs
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn set_synced(&mut self, synced: bool) {
        self.synced = synced;
    }

    pub fn was_attempted(&self, peer: PeerId) -> bool {
        self.attempted.contains(&peer)
    }

    /// Forget a disconnected peer so it may be tried again after reconnecting.
    pub fn forget_peer(&mut self, peer: PeerId) {
        self.attempted.remove(&peer);
        self.release(peer);
    }
}
