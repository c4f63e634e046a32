//! Per-peer misbehavior scoring.
//!
//! Each connected peer has a record holding an additive score. Once the score
//! reaches [`DISCOURAGEMENT_THRESHOLD`] the peer is flagged for disconnect,
//! unless it holds [`PeerPermissions::NO_BAN`]. Scores never decay; a record
//! lives exactly as long as the connection.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::network::constants::{
    DISCOURAGEMENT_THRESHOLD, MAX_UNCONNECTING_HEADERS, misbehavior_scores,
};
use crate::network::peer::{PeerInfo, PeerPermissions};
use crate::store::KeyedStore;
use crate::types::{BlockHash, PeerId};

#[derive(Debug, Clone)]
struct MisbehaviorRecord {
    address: String,
    score: u32,
    should_discourage: bool,
    permissions: PeerPermissions,
    unconnecting_headers: u32,
    invalid_header_hashes: HashSet<BlockHash>,
}

impl MisbehaviorRecord {
    fn new(address: String, permissions: PeerPermissions) -> Self {
        Self {
            address,
            score: 0,
            should_discourage: false,
            permissions,
            unconnecting_headers: 0,
            invalid_header_hashes: HashSet::new(),
        }
    }

    fn is_no_ban(&self) -> bool {
        self.permissions.contains(PeerPermissions::NO_BAN)
    }
}

/// Serializable view of one peer's record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMisbehaviorSnapshot {
    pub peer: PeerId,
    pub address: String,
    pub score: u32,
    pub discouraged: bool,
    pub permissions: PeerPermissions,
    pub unconnecting_headers: u32,
}

/// Tracks misbehavior for every connected peer.
///
/// Records are stored per peer id in a [`KeyedStore`], so scoring one peer
/// never blocks bookkeeping for another.
#[derive(Debug, Default)]
pub struct MisbehaviorTracker {
    peers: KeyedStore<PeerId, MisbehaviorRecord>,
}

impl MisbehaviorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh record for a newly connected peer.
    pub fn register_peer(&self, info: &PeerInfo) {
        let record = MisbehaviorRecord::new(info.address.clone(), info.permissions);
        if !self.peers.insert_if_absent(info.id, record) {
            debug!("Misbehavior record for {} already exists", info.id);
        }
    }

    /// Destroy a peer's record. Nothing carries over to a later connection.
    pub fn remove_peer(&self, peer: PeerId) {
        self.peers.remove(&peer);
    }

    pub fn is_tracked(&self, peer: PeerId) -> bool {
        self.peers.contains(&peer)
    }

    /// Add `amount` to the peer's score.
    ///
    /// Returns true once the score has reached the threshold, and keeps
    /// returning true for later penalties. NoBan peers and unknown peers always
    /// get false.
    pub fn penalize(&self, peer: PeerId, amount: u32, reason: &str) -> bool {
        let outcome = self.peers.update(&peer, |record| {
            let old_score = record.score;
            record.score = record.score.saturating_add(amount);
            trace!(
                "{} ({}) misbehavior +{}: {} (score {} -> {})",
                peer, record.address, amount, reason, old_score, record.score
            );

            if record.score >= DISCOURAGEMENT_THRESHOLD && old_score < DISCOURAGEMENT_THRESHOLD {
                if record.is_no_ban() {
                    warn!(
                        "NoBan {} not punished for {} (score {} >= {})",
                        peer, reason, record.score, DISCOURAGEMENT_THRESHOLD
                    );
                } else {
                    record.should_discourage = true;
                    warn!(
                        "{} ({}) marked for disconnect: {} (score {} >= {})",
                        peer, record.address, reason, record.score, DISCOURAGEMENT_THRESHOLD
                    );
                }
            }
            record.should_discourage && !record.is_no_ban()
        });

        match outcome {
            Some(disconnect) => disconnect,
            None => {
                trace!("Misbehavior for unknown {} ignored: {}", peer, reason);
                false
            }
        }
    }

    pub fn report_invalid_pow(&self, peer: PeerId) -> bool {
        self.penalize(peer, misbehavior_scores::INVALID_POW, "header with invalid proof of work")
    }

    pub fn report_invalid_header(&self, peer: PeerId, reason: &str) -> bool {
        let reason = format!("invalid header: {}", reason);
        self.penalize(peer, misbehavior_scores::INVALID_HEADER, &reason)
    }

    pub fn report_oversized_message(&self, peer: PeerId) -> bool {
        self.penalize(peer, misbehavior_scores::OVERSIZED_MESSAGE, "oversized message")
    }

    pub fn report_non_continuous_headers(&self, peer: PeerId) -> bool {
        self.penalize(
            peer,
            misbehavior_scores::NON_CONTINUOUS_HEADERS,
            "non-continuous headers sequence",
        )
    }

    pub fn report_low_work_headers(&self, peer: PeerId) -> bool {
        self.penalize(peer, misbehavior_scores::LOW_WORK_HEADERS, "low-work headers")
    }

    pub fn report_too_many_orphans(&self, peer: PeerId) -> bool {
        self.penalize(peer, misbehavior_scores::TOO_MANY_ORPHANS, "exceeded orphan header limit")
    }

    pub fn report_too_many_unconnecting(&self, peer: PeerId) -> bool {
        self.penalize(
            peer,
            misbehavior_scores::TOO_MANY_UNCONNECTING,
            "too many unconnecting headers",
        )
    }

    /// Count one more HEADERS message that did not connect. Returns true when
    /// the count has reached [`MAX_UNCONNECTING_HEADERS`]; the caller penalizes
    /// and then calls [`reset_unconnecting_headers`](Self::reset_unconnecting_headers).
    pub fn increment_unconnecting_headers(&self, peer: PeerId) -> bool {
        self.peers
            .update(&peer, |record| {
                record.unconnecting_headers += 1;
                trace!(
                    "{} has sent {} unconnecting headers messages (limit {})",
                    peer, record.unconnecting_headers, MAX_UNCONNECTING_HEADERS
                );
                record.unconnecting_headers >= MAX_UNCONNECTING_HEADERS
            })
            .unwrap_or(false)
    }

    pub fn reset_unconnecting_headers(&self, peer: PeerId) {
        self.peers.update(&peer, |record| record.unconnecting_headers = 0);
    }

    pub fn unconnecting_headers(&self, peer: PeerId) -> u32 {
        self.peers.read(&peer, |record| record.unconnecting_headers).unwrap_or(0)
    }

    /// Remember that `peer` was already penalized for `hash`.
    pub fn note_invalid_header_hash(&self, peer: PeerId, hash: BlockHash) {
        self.peers.update(&peer, |record| {
            record.invalid_header_hashes.insert(hash);
        });
    }

    pub fn has_invalid_header_hash(&self, peer: PeerId, hash: &BlockHash) -> bool {
        self.peers
            .read(&peer, |record| record.invalid_header_hashes.contains(hash))
            .unwrap_or(false)
    }

    pub fn misbehavior_score(&self, peer: PeerId) -> u32 {
        self.peers.read(&peer, |record| record.score).unwrap_or(0)
    }

    /// Whether the peer should be disconnected. Never true for NoBan peers.
    pub fn should_disconnect(&self, peer: PeerId) -> bool {
        self.peers
            .read(&peer, |record| record.should_discourage && !record.is_no_ban())
            .unwrap_or(false)
    }

    pub fn permissions(&self, peer: PeerId) -> Option<PeerPermissions> {
        self.peers.read(&peer, |record| record.permissions)
    }

    pub fn address(&self, peer: PeerId) -> Option<String> {
        self.peers.read(&peer, |record| record.address.clone())
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Per-peer view ordered by peer id.
    pub fn snapshot(&self) -> Vec<PeerMisbehaviorSnapshot> {
        let mut peers: Vec<PeerMisbehaviorSnapshot> = self
            .peers
            .snapshot()
            .into_iter()
            .map(|(peer, record)| PeerMisbehaviorSnapshot {
                peer,
                discouraged: record.should_discourage && !record.is_no_ban(),
                address: record.address,
                score: record.score,
                permissions: record.permissions,
                unconnecting_headers: record.unconnecting_headers,
            })
            .collect();
        peers.sort_by_key(|snapshot| snapshot.peer);
        peers
    }
}

#[cfg(test)]
#[path = "misbehavior_test.rs"]
mod misbehavior_test;
