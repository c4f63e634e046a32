use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{debug, trace};

use crate::store::KeyedStore;
use crate::types::{BlockHash, BlockHeader, PeerId};

/// Maximum number of orphan headers held across all peers
pub const MAX_ORPHAN_HEADERS: usize = 1000;

/// Maximum number of orphan headers a single peer may hold
pub const MAX_ORPHAN_HEADERS_PER_PEER: usize = 50;

/// Maximum time to keep an orphan header before eviction
pub const ORPHAN_HEADER_EXPIRE_TIME: Duration = Duration::from_secs(600); // 10 minutes

/// Attempts to reserve a global slot before giving up under contention.
const MAX_RESERVE_ATTEMPTS: usize = 8;

/// A header whose parent is not yet indexed
#[derive(Debug, Clone)]
pub struct OrphanEntry {
    pub header: BlockHeader,
    pub hash: BlockHash,
    /// Peer that submitted the header
    pub peer: PeerId,
    /// Unix time the orphan arrived
    pub received_at: i64,
    sequence: u64,
}

/// Result of [`OrphanHeaderPool::insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Added,
    /// Already cached; nothing changed.
    Duplicate,
    /// The submitting peer already holds its quota.
    PeerLimit,
    /// No slot could be freed.
    PoolFull,
}

/// Statistics about the orphan pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanPoolStats {
    pub total_orphans: usize,
    pub max_orphans: usize,
    pub unique_parents: usize,
    pub peers: usize,
}

/// Bounded cache of headers that arrived before their parent.
///
/// Entries are indexed by their own hash and by the missing parent hash. The
/// global size is tracked by an atomic reservation counter, so concurrent
/// inserts never push the pool past its cap.
pub struct OrphanHeaderPool {
    by_hash: KeyedStore<BlockHash, OrphanEntry>,
    by_parent: KeyedStore<BlockHash, Vec<BlockHash>>,
    per_peer: KeyedStore<PeerId, usize>,
    size: AtomicUsize,
    next_sequence: AtomicU64,
    max_orphans: usize,
    max_orphans_per_peer: usize,
    expire_secs: i64,
}

impl Default for OrphanHeaderPool {
    fn default() -> Self {
        Self::new()
    }
}

impl OrphanHeaderPool {
    /// Creates a new orphan pool with default settings
    pub fn new() -> Self {
        Self::with_config(
            MAX_ORPHAN_HEADERS,
            MAX_ORPHAN_HEADERS_PER_PEER,
            ORPHAN_HEADER_EXPIRE_TIME,
        )
    }

    /// Creates a new orphan pool with custom limits
    pub fn with_config(
        max_orphans: usize,
        max_orphans_per_peer: usize,
        expire_time: Duration,
    ) -> Self {
        Self {
            by_hash: KeyedStore::with_capacity(max_orphans),
            by_parent: KeyedStore::new(),
            per_peer: KeyedStore::new(),
            size: AtomicUsize::new(0),
            next_sequence: AtomicU64::new(0),
            max_orphans,
            max_orphans_per_peer,
            expire_secs: expire_time.as_secs() as i64,
        }
    }

    /// Cache `header` on behalf of `peer`.
    ///
    /// A full pool makes room by dropping expired entries, then the oldest one.
    pub fn insert(&self, header: BlockHeader, peer: PeerId, now: i64) -> InsertOutcome {
        let hash = header.block_hash();
        if self.by_hash.contains(&hash) {
            trace!("Orphan header {} already in pool", hash);
            return InsertOutcome::Duplicate;
        }

        let max_per_peer = self.max_orphans_per_peer;
        let reserved = self.per_peer.upsert(
            peer,
            || 0,
            |count| {
                if *count >= max_per_peer {
                    false
                } else {
                    *count += 1;
                    true
                }
            },
        );
        if !reserved {
            debug!(
                "Orphan header {} from {} refused: peer holds {} orphans",
                hash, peer, max_per_peer
            );
            return InsertOutcome::PeerLimit;
        }

        if !self.reserve_slot(now) {
            self.release_peer_slot(peer);
            debug!("Orphan header {} from {} refused: pool full", hash, peer);
            return InsertOutcome::PoolFull;
        }

        let entry = OrphanEntry {
            header,
            hash,
            peer,
            received_at: now,
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
        };
        if !self.by_hash.insert_if_absent(hash, entry) {
            // Lost a race with an identical insert.
            self.size.fetch_sub(1, Ordering::AcqRel);
            self.release_peer_slot(peer);
            return InsertOutcome::Duplicate;
        }
        self.by_parent.upsert(header.prev_blockhash, Vec::new, |children| children.push(hash));

        debug!("Added orphan header {} (prev: {}) from {}", hash, header.prev_blockhash, peer);
        InsertOutcome::Added
    }

    /// Claim one unit of global capacity, evicting if needed.
    fn reserve_slot(&self, now: i64) -> bool {
        for _ in 0..MAX_RESERVE_ATTEMPTS {
            let current = self.size.load(Ordering::Acquire);
            if current < self.max_orphans {
                if self
                    .size
                    .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return true;
                }
                continue;
            }
            if self.evict_expired(now) == 0 && !self.evict_oldest() {
                return false;
            }
        }
        false
    }

    fn release_peer_slot(&self, peer: PeerId) {
        self.per_peer.update(&peer, |count| *count = count.saturating_sub(1));
        self.per_peer.remove_if(&peer, |count| *count == 0);
    }

    /// Remove an orphan from every index.
    pub fn remove(&self, hash: &BlockHash) -> Option<OrphanEntry> {
        let entry = self.by_hash.remove(hash)?;
        self.size.fetch_sub(1, Ordering::AcqRel);
        self.release_peer_slot(entry.peer);

        let parent = entry.header.prev_blockhash;
        self.by_parent.update(&parent, |children| children.retain(|child| child != hash));
        self.by_parent.remove_if(&parent, |children| children.is_empty());

        trace!("Removed orphan header {}", hash);
        Some(entry)
    }

    /// Remove and return every orphan whose parent is `parent`, oldest first.
    ///
    /// Entries are moved out, so callers may re-submit them and cascade further
    /// without holding any reference into the pool.
    pub fn take_children(&self, parent: &BlockHash) -> Vec<OrphanEntry> {
        let Some(children) = self.by_parent.remove(parent) else {
            return Vec::new();
        };
        let mut released: Vec<OrphanEntry> =
            children.iter().filter_map(|child| self.remove(child)).collect();
        released.sort_by_key(|entry| entry.sequence);
        if !released.is_empty() {
            debug!("Released {} orphan headers waiting on {}", released.len(), parent);
        }
        released
    }

    /// Drop entries older than the expiry time. Returns how many were removed.
    pub fn evict_expired(&self, now: i64) -> usize {
        let expire_secs = self.expire_secs;
        let expired: Vec<BlockHash> = self
            .by_hash
            .snapshot()
            .into_iter()
            .filter(|(_, entry)| now - entry.received_at > expire_secs)
            .map(|(hash, _)| hash)
            .collect();

        let removed = expired.iter().filter(|hash| self.remove(hash).is_some()).count();
        if removed > 0 {
            debug!("Evicted {} expired orphan headers", removed);
        }
        removed
    }

    /// Drop the entry that arrived first.
    fn evict_oldest(&self) -> bool {
        let Some(oldest) = self.by_hash.min_by_key(|entry| (entry.received_at, entry.sequence))
        else {
            return false;
        };
        if self.remove(&oldest).is_some() {
            debug!("Evicted oldest orphan header {} due to size limit", oldest);
        }
        // Also true when another thread removed it first; capacity was freed either way.
        true
    }

    /// Checks if a header is cached as an orphan
    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.by_hash.contains(hash)
    }

    pub fn get(&self, hash: &BlockHash) -> Option<OrphanEntry> {
        self.by_hash.get(hash)
    }

    /// Number of orphans currently held for `peer`
    pub fn peer_count(&self, peer: PeerId) -> usize {
        self.per_peer.get(&peer).unwrap_or(0)
    }

    /// Gets the number of orphan headers
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Checks if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gets statistics about the orphan pool
    pub fn stats(&self) -> OrphanPoolStats {
        OrphanPoolStats {
            total_orphans: self.len(),
            max_orphans: self.max_orphans,
            unique_parents: self.by_parent.len(),
            peers: self.per_peer.len(),
        }
    }

    /// Clears all orphan headers
    pub fn clear(&self) {
        for hash in self.by_hash.keys() {
            self.remove(&hash);
        }
    }
}

#[cfg(test)]
#[path = "orphan_pool_test.rs"]
mod orphan_pool_test;
