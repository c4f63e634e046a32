//! In-memory header index.
//!
//! Records form a tree rooted at genesis, keyed by hash. The active chain is a
//! height-indexed vector of hashes from genesis to the current tip. Candidates
//! are records that could become the tip, ordered by cumulative work with
//! earlier arrivals winning ties.
//!
//! The index is not synchronized. [`ChainstateManager`](super::ChainstateManager)
//! owns it behind a single lock.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use crate::chain::chain_work::ChainWork;
use crate::error::{ChainError, ChainResult};
use crate::types::{BlockHash, BlockHeader};

/// Timestamps considered for median-time-past.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Validation state of a header hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Validity {
    Valid,
    Failed,
    /// Not present in the index.
    Unknown,
}

/// A header as stored in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRecord {
    pub hash: BlockHash,
    pub header: BlockHeader,
    pub height: u32,
    pub chain_work: ChainWork,
    pub validity: Validity,
    /// Arrival order, used to break chain-work ties.
    pub sequence: u64,
}

impl HeaderRecord {
    pub fn prev_hash(&self) -> BlockHash {
        self.header.prev_blockhash
    }

    pub fn time(&self) -> i64 {
        i64::from(self.header.time)
    }

    pub fn is_valid(&self) -> bool {
        self.validity == Validity::Valid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct CandidateKey {
    work: ChainWork,
    sequence: Reverse<u64>,
    hash: BlockHash,
}

/// Outcome of moving the active tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipChange {
    pub fork_height: u32,
    pub disconnected: Vec<BlockHash>,
    pub connected: Vec<BlockHash>,
}

impl TipChange {
    pub fn reorg_depth(&self) -> usize {
        self.disconnected.len()
    }
}

#[derive(Debug)]
pub struct HeaderIndex {
    records: HashMap<BlockHash, HeaderRecord>,
    active: Vec<BlockHash>,
    candidates: BTreeSet<CandidateKey>,
    best_header: BlockHash,
    next_sequence: u64,
}

impl HeaderIndex {
    /// Create an index holding only `genesis`, which is also the tip.
    pub fn new(genesis: BlockHeader) -> Self {
        let hash = genesis.block_hash();
        let record = HeaderRecord {
            hash,
            header: genesis,
            height: 0,
            chain_work: ChainWork::from_bits(genesis.bits),
            validity: Validity::Valid,
            sequence: 0,
        };
        let mut records = HashMap::new();
        records.insert(hash, record);
        Self {
            records,
            active: vec![hash],
            candidates: BTreeSet::new(),
            best_header: hash,
            next_sequence: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn genesis_hash(&self) -> BlockHash {
        self.active[0]
    }

    pub fn get(&self, hash: &BlockHash) -> Option<&HeaderRecord> {
        self.records.get(hash)
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.records.contains_key(hash)
    }

    pub fn validity_of(&self, hash: &BlockHash) -> Validity {
        self.records.get(hash).map_or(Validity::Unknown, |record| record.validity)
    }

    pub fn tip(&self) -> Option<&HeaderRecord> {
        self.active.last().and_then(|hash| self.records.get(hash))
    }

    pub fn tip_height(&self) -> u32 {
        (self.active.len() - 1) as u32
    }

    /// Header with the most work seen so far, active or not.
    pub fn best_header(&self) -> Option<&HeaderRecord> {
        self.records.get(&self.best_header)
    }

    pub fn at_height(&self, height: u32) -> Option<&HeaderRecord> {
        self.active.get(height as usize).and_then(|hash| self.records.get(hash))
    }

    pub fn is_on_active_chain(&self, hash: &BlockHash) -> bool {
        self.records
            .get(hash)
            .is_some_and(|record| self.active.get(record.height as usize) == Some(hash))
    }

    /// Ancestor of `hash` at `height`. Walks parents until the branch meets the
    /// active chain, then indexes into it directly.
    pub fn ancestor(&self, hash: &BlockHash, height: u32) -> Option<&HeaderRecord> {
        let mut current = self.records.get(hash)?;
        if height > current.height {
            return None;
        }
        loop {
            if current.height == height {
                return Some(current);
            }
            if self.is_on_active_chain(&current.hash) {
                return self.at_height(height);
            }
            current = self.records.get(&current.prev_hash())?;
        }
    }

    /// Highest record shared by the branch ending at `hash` and the active chain.
    pub fn fork_point(&self, hash: &BlockHash) -> Option<&HeaderRecord> {
        let mut current = self.records.get(hash)?;
        while !self.is_on_active_chain(&current.hash) {
            current = self.records.get(&current.prev_hash())?;
        }
        Some(current)
    }

    /// Median timestamp of `hash` and up to ten of its predecessors.
    pub fn median_time_past(&self, hash: &BlockHash) -> Option<i64> {
        let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
        let mut current = self.records.get(hash);
        while let Some(record) = current {
            times.push(record.time());
            if times.len() == MEDIAN_TIME_SPAN || record.height == 0 {
                break;
            }
            current = self.records.get(&record.prev_hash());
        }
        if times.is_empty() {
            return None;
        }
        times.sort_unstable();
        Some(times[times.len() / 2])
    }

    /// Whether `hash` or any of its ancestors is marked failed.
    pub fn descends_from_failed(&self, hash: &BlockHash) -> bool {
        let mut current = self.records.get(hash);
        while let Some(record) = current {
            if !record.is_valid() {
                return true;
            }
            // Active-chain records are never failed; stop once the branch joins.
            if self.is_on_active_chain(&record.hash) || record.height == 0 {
                return false;
            }
            current = self.records.get(&record.prev_hash());
        }
        false
    }

    /// Insert a child of an indexed parent. The caller has validated the header.
    pub fn insert(&mut self, header: BlockHeader, validity: Validity) -> ChainResult<HeaderRecord> {
        let hash = header.block_hash();
        let parent = self
            .records
            .get(&header.prev_blockhash)
            .ok_or(ChainError::UnknownBlock(header.prev_blockhash))?;
        let record = HeaderRecord {
            hash,
            header,
            height: parent.height + 1,
            chain_work: parent.chain_work + ChainWork::from_bits(header.bits),
            validity,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;

        if record.is_valid()
            && self.best_header().is_none_or(|best| record.chain_work > best.chain_work)
        {
            self.best_header = hash;
        }
        self.records.insert(hash, record.clone());
        Ok(record)
    }

    /// Mark `hash` and every descendant failed. Returns the number of records changed.
    pub fn mark_failed(&mut self, hash: &BlockHash) -> ChainResult<usize> {
        let root = self.records.get(hash).ok_or(ChainError::UnknownBlock(*hash))?;
        if root.height == 0 {
            return Err(ChainError::GenesisInvalidation);
        }
        let root_height = root.height;

        let doomed: Vec<BlockHash> = self
            .records
            .values()
            .filter(|record| record.height >= root_height)
            .filter(|record| {
                self.ancestor(&record.hash, root_height).is_some_and(|a| a.hash == *hash)
            })
            .map(|record| record.hash)
            .collect();

        for failed in &doomed {
            if let Some(record) = self.records.get_mut(failed) {
                record.validity = Validity::Failed;
            }
        }
        self.candidates.retain(|key| !doomed.contains(&key.hash));
        if doomed.contains(&self.best_header) {
            self.recompute_best_header();
        }
        Ok(doomed.len())
    }

    fn recompute_best_header(&mut self) {
        let best = self
            .records
            .values()
            .filter(|record| record.is_valid())
            .max_by_key(|record| (record.chain_work, Reverse(record.sequence)))
            .map(|record| record.hash);
        if let Some(best) = best {
            self.best_header = best;
        }
    }

    /// Mark a single record failed without touching descendants.
    #[cfg(test)]
    pub(crate) fn set_failed(&mut self, hash: &BlockHash) {
        if let Some(record) = self.records.get_mut(hash) {
            record.validity = Validity::Failed;
        }
        self.candidates.retain(|key| key.hash != *hash);
    }

    /// Register `hash` as a possible tip if it is valid and has at least the
    /// tip's work. Returns whether it was added.
    pub fn add_candidate(&mut self, hash: &BlockHash) -> bool {
        let Some(record) = self.records.get(hash) else {
            return false;
        };
        if !record.is_valid() {
            return false;
        }
        if self.tip().is_some_and(|tip| record.chain_work < tip.chain_work) {
            return false;
        }
        self.candidates.insert(CandidateKey {
            work: record.chain_work,
            sequence: Reverse(record.sequence),
            hash: *hash,
        })
    }

    pub fn remove_candidate(&mut self, hash: &BlockHash) {
        self.candidates.retain(|key| key.hash != *hash);
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    /// Highest-work candidate whose whole branch is valid.
    pub fn best_candidate(&self) -> Option<&HeaderRecord> {
        self.candidates
            .iter()
            .rev()
            .filter(|key| !self.descends_from_failed(&key.hash))
            .find_map(|key| self.records.get(&key.hash))
    }

    /// Drop candidates that can no longer beat the tip.
    pub fn prune_candidates(&mut self) {
        let Some(tip_work) = self.tip().map(|tip| tip.chain_work) else {
            return;
        };
        self.candidates.retain(|key| key.work > tip_work);
    }

    /// Re-derive candidates from every valid record with at least the tip's work.
    pub fn rebuild_candidates(&mut self) {
        self.candidates.clear();
        let hashes: Vec<BlockHash> = self
            .records
            .values()
            .filter(|record| record.is_valid() && !self.is_on_active_chain(&record.hash))
            .map(|record| record.hash)
            .collect();
        for hash in hashes {
            if !self.descends_from_failed(&hash) {
                self.add_candidate(&hash);
            }
        }
    }

    /// Make `hash` the active tip, rewinding to the fork point first.
    pub fn set_tip(&mut self, hash: &BlockHash) -> ChainResult<TipChange> {
        let fork = self.fork_point(hash).ok_or(ChainError::UnknownBlock(*hash))?;
        let fork_height = fork.height;

        let mut connected = Vec::new();
        let mut current = self.records.get(hash).ok_or(ChainError::UnknownBlock(*hash))?;
        while current.height > fork_height {
            let child = current.hash;
            connected.push(child);
            current = self
                .records
                .get(&current.prev_hash())
                .ok_or_else(|| ChainError::Inconsistent(format!("missing parent of {}", child)))?;
        }
        connected.reverse();

        let disconnected: Vec<BlockHash> =
            self.active.drain(fork_height as usize + 1..).rev().collect();
        self.active.extend(connected.iter().copied());

        Ok(TipChange {
            fork_height,
            disconnected,
            connected,
        })
    }

    /// Depth of the reorganization needed to make `hash` the tip.
    pub fn reorg_depth_to(&self, hash: &BlockHash) -> Option<u32> {
        let fork = self.fork_point(hash)?;
        Some(self.tip_height() - fork.height)
    }

    /// Active-chain headers strictly after `start_height`, ending at `stop`
    /// (inclusive) or after `limit` headers.
    pub fn headers_after(
        &self,
        start_height: u32,
        stop: &BlockHash,
        limit: usize,
    ) -> Vec<BlockHeader> {
        let mut headers = Vec::new();
        for hash in self.active.iter().skip(start_height as usize + 1) {
            if headers.len() >= limit {
                break;
            }
            let Some(record) = self.records.get(hash) else {
                break;
            };
            headers.push(record.header);
            if hash == stop {
                break;
            }
        }
        headers
    }
}

#[cfg(test)]
#[path = "index_test.rs"]
mod index_test;
