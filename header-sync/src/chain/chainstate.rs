//! Serialized entry point for header acceptance and chain activation.
//!
//! Every mutation of the [`HeaderIndex`] goes through one lock held by
//! [`ChainstateManager`], so batches from different peers never interleave at
//! the graph level. The orphan pool is consulted under that same lock during
//! acceptance but has its own per-key locking for periodic expiry.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::chain::block_locator::build_block_locator;
use crate::chain::index::{HeaderIndex, HeaderRecord, TipChange, Validity};
use crate::chain::orphan_pool::{InsertOutcome, OrphanHeaderPool};
use crate::client::config::{ChainParams, SyncConfig};
use crate::error::{ChainError, ChainResult};
use crate::time::Clock;
use crate::types::{BlockHash, BlockHeader, PeerId};
use crate::validation::headers::{HeaderContext, check_contextual};
use crate::validation::pow::{PowVerifyMode, ProofOfWork};

/// Why a header was not indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Already indexed and known to be invalid.
    Duplicate,
    HighHash,
    BadDiffBits,
    TimeTooOld,
    TimeTooNew,
    BadVersion,
    /// Parent is invalid or descends from an invalid header.
    BadPrevBlock,
    /// Parentless header that is not our genesis.
    BadGenesis,
    /// Our genesis submitted through acceptance.
    GenesisViaAccept,
    /// The orphan pool refused the header.
    OrphanLimit,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Duplicate => "duplicate",
            RejectReason::HighHash => "high-hash",
            RejectReason::BadDiffBits => "bad-diffbits",
            RejectReason::TimeTooOld => "time-too-old",
            RejectReason::TimeTooNew => "time-too-new",
            RejectReason::BadVersion => "bad-version",
            RejectReason::BadPrevBlock => "bad-prevblk",
            RejectReason::BadGenesis => "bad-genesis",
            RejectReason::GenesisViaAccept => "genesis-via-accept",
            RejectReason::OrphanLimit => "orphan-limit",
        }
    }

    /// Failures that can never become valid later. Headers rejected for these
    /// reasons are recorded as failed when their parent is known.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            RejectReason::HighHash
                | RejectReason::BadDiffBits
                | RejectReason::TimeTooOld
                | RejectReason::BadVersion
        )
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured result of submitting one header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Indexed as valid, now or earlier.
    Accepted(HeaderRecord),
    /// Parent unknown; cached in the orphan pool.
    Orphaned,
    Rejected(RejectReason),
}

pub struct ChainstateManager {
    params: ChainParams,
    max_future_block_time: i64,
    ibd_max_tip_age: i64,
    index: Mutex<HeaderIndex>,
    orphans: OrphanHeaderPool,
    pow: Arc<dyn ProofOfWork>,
    clock: Arc<dyn Clock>,
    left_ibd: AtomicBool,
}

impl ChainstateManager {
    pub fn new(config: &SyncConfig, pow: Arc<dyn ProofOfWork>, clock: Arc<dyn Clock>) -> Self {
        Self {
            params: config.chain.clone(),
            max_future_block_time: config.max_future_block_time.as_secs() as i64,
            ibd_max_tip_age: config.ibd_max_tip_age.as_secs() as i64,
            index: Mutex::new(HeaderIndex::new(config.chain.genesis)),
            orphans: OrphanHeaderPool::with_config(
                config.max_orphans,
                config.max_orphans_per_peer,
                config.orphan_expire_time,
            ),
            pow,
            clock,
            left_ibd: AtomicBool::new(false),
        }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn pow(&self) -> &dyn ProofOfWork {
        self.pow.as_ref()
    }

    pub fn orphans(&self) -> &OrphanHeaderPool {
        &self.orphans
    }

    /// Validate `header` and index it, or cache it as an orphan.
    ///
    /// When the header is indexed, orphans waiting on it are re-submitted
    /// transitively before this returns.
    pub fn accept_header(&self, header: &BlockHeader, peer: PeerId) -> AcceptOutcome {
        let now = self.clock.now();
        let mut index = self.index.lock();
        let outcome = self.accept_locked(&mut index, header, peer, now);
        if let AcceptOutcome::Accepted(record) = &outcome {
            self.process_orphans(&mut index, record.hash, now);
        }
        outcome
    }

    fn accept_locked(
        &self,
        index: &mut HeaderIndex,
        header: &BlockHeader,
        peer: PeerId,
        now: i64,
    ) -> AcceptOutcome {
        let hash = header.block_hash();

        if let Some(existing) = index.get(&hash) {
            if existing.is_valid() {
                trace!("Header {} already indexed at height {}", hash, existing.height);
                return AcceptOutcome::Accepted(existing.clone());
            }
            debug!("Known invalid header {} re-announced by {}", hash, peer);
            return AcceptOutcome::Rejected(RejectReason::Duplicate);
        }

        if self.orphans.contains(&hash) {
            trace!("Header {} already cached as orphan", hash);
            return AcceptOutcome::Orphaned;
        }

        if !self.pow.check_proof_of_work(header, PowVerifyMode::Commitment) {
            return AcceptOutcome::Rejected(RejectReason::HighHash);
        }

        if header.is_genesis_shaped() {
            return if hash == index.genesis_hash() {
                AcceptOutcome::Rejected(RejectReason::GenesisViaAccept)
            } else {
                AcceptOutcome::Rejected(RejectReason::BadGenesis)
            };
        }

        let Some(parent) = index.get(&header.prev_blockhash) else {
            return match self.orphans.insert(*header, peer, now) {
                InsertOutcome::Added | InsertOutcome::Duplicate => AcceptOutcome::Orphaned,
                InsertOutcome::PeerLimit | InsertOutcome::PoolFull => {
                    AcceptOutcome::Rejected(RejectReason::OrphanLimit)
                }
            };
        };

        if !parent.is_valid() || index.descends_from_failed(&parent.hash) {
            return AcceptOutcome::Rejected(RejectReason::BadPrevBlock);
        }

        let ctx = HeaderContext {
            parent_median_time: index.median_time_past(&parent.hash).unwrap_or(0),
            now,
            max_future_block_time: self.max_future_block_time,
            expected_bits: self.pow.expected_bits(parent),
        };
        let verdict = check_contextual(header, &ctx).and_then(|()| {
            if self.pow.check_proof_of_work(header, PowVerifyMode::Full) {
                Ok(())
            } else {
                Err(RejectReason::HighHash)
            }
        });

        if let Err(reason) = verdict {
            if reason.is_permanent() {
                if let Err(e) = index.insert(*header, Validity::Failed) {
                    warn!("Failed to record invalid header {}: {}", hash, e);
                }
            }
            return AcceptOutcome::Rejected(reason);
        }

        match index.insert(*header, Validity::Valid) {
            Ok(record) => {
                trace!("Accepted header {} at height {}", hash, record.height);
                AcceptOutcome::Accepted(record)
            }
            Err(e) => {
                warn!("Failed to index header {}: {}", hash, e);
                AcceptOutcome::Rejected(RejectReason::BadPrevBlock)
            }
        }
    }

    /// Re-submit orphans unblocked by `parent`, following newly indexed
    /// headers until no more orphans connect.
    fn process_orphans(&self, index: &mut HeaderIndex, parent: BlockHash, now: i64) {
        let mut pending = vec![parent];
        while let Some(next) = pending.pop() {
            for orphan in self.orphans.take_children(&next) {
                match self.accept_locked(index, &orphan.header, orphan.peer, now) {
                    AcceptOutcome::Accepted(record) => {
                        index.add_candidate(&record.hash);
                        pending.push(record.hash);
                    }
                    AcceptOutcome::Orphaned => {}
                    AcceptOutcome::Rejected(reason) => {
                        debug!(
                            "Orphan header {} from {} rejected on reconnect: {}",
                            orphan.hash, orphan.peer, reason
                        );
                    }
                }
            }
        }
    }

    /// Register an indexed header as a possible new tip.
    pub fn try_add_candidate(&self, hash: &BlockHash) -> bool {
        self.index.lock().add_candidate(hash)
    }

    /// Move the tip to the most-work valid candidate when it has strictly more
    /// work than the current tip. Returns the change, if any.
    pub fn activate_best_chain(&self) -> ChainResult<Option<TipChange>> {
        let mut index = self.index.lock();
        let Some(tip_work) = index.tip().map(|tip| tip.chain_work) else {
            return Err(ChainError::Inconsistent("active chain is empty".to_string()));
        };
        let Some(best) = index.best_candidate().cloned() else {
            return Ok(None);
        };
        if best.chain_work <= tip_work {
            index.prune_candidates();
            return Ok(None);
        }

        let limit = self.params.suspicious_reorg_depth;
        if limit > 0 {
            let depth = index.reorg_depth_to(&best.hash).unwrap_or(0);
            if depth >= limit {
                warn!(
                    "Refusing reorganization of {} blocks to {} at height {} (limit {})",
                    depth, best.hash, best.height, limit
                );
                index.remove_candidate(&best.hash);
                return Err(ChainError::SuspiciousReorg {
                    depth,
                    limit,
                });
            }
        }

        let change = index.set_tip(&best.hash)?;
        index.prune_candidates();
        if change.reorg_depth() > 0 {
            info!(
                "Reorganized {} headers at fork height {}: new tip {} at height {}",
                change.reorg_depth(),
                change.fork_height,
                best.hash,
                best.height
            );
        } else {
            debug!("New tip {} at height {}", best.hash, best.height);
        }
        Ok(Some(change))
    }

    /// Mark `hash` and its descendants failed and rewind the active chain
    /// below it. Remaining valid branches become candidates again.
    pub fn invalidate_block(&self, hash: &BlockHash) -> ChainResult<()> {
        let mut index = self.index.lock();
        let record = index.get(hash).cloned().ok_or(ChainError::UnknownBlock(*hash))?;
        let was_active = index.is_on_active_chain(hash);
        let marked = index.mark_failed(hash)?;
        if was_active {
            index.set_tip(&record.prev_hash())?;
        }
        index.rebuild_candidates();
        info!("Invalidated {} ({} headers marked failed)", hash, marked);
        Ok(())
    }

    pub fn tip(&self) -> Option<HeaderRecord> {
        self.index.lock().tip().cloned()
    }

    pub fn tip_height(&self) -> u32 {
        self.index.lock().tip_height()
    }

    pub fn best_header(&self) -> Option<HeaderRecord> {
        self.index.lock().best_header().cloned()
    }

    pub fn lookup(&self, hash: &BlockHash) -> Option<HeaderRecord> {
        self.index.lock().get(hash).cloned()
    }

    pub fn validity_of(&self, hash: &BlockHash) -> Validity {
        self.index.lock().validity_of(hash)
    }

    pub fn is_on_active_chain(&self, hash: &BlockHash) -> bool {
        self.index.lock().is_on_active_chain(hash)
    }

    pub fn header_count(&self) -> usize {
        self.index.lock().len()
    }

    /// Locator for the branch ending at `from`.
    pub fn locator_from(&self, from: &BlockHash) -> Vec<BlockHash> {
        let index = self.index.lock();
        build_block_locator(&index, from)
    }

    /// Locator starting at the tip's parent, so a peer on the same tip still
    /// answers with at least that tip.
    pub fn locator_from_tip_parent(&self) -> Vec<BlockHash> {
        let index = self.index.lock();
        let start = match index.tip() {
            Some(tip) if tip.height > 0 => tip.prev_hash(),
            _ => index.genesis_hash(),
        };
        build_block_locator(&index, &start)
    }

    /// Headers answering a GETHEADERS: active-chain headers after the first
    /// locator entry on the active chain (genesis if none), up to `stop` or
    /// `limit` headers.
    pub fn headers_for_locator(
        &self,
        locator: &[BlockHash],
        stop: &BlockHash,
        limit: usize,
    ) -> Vec<BlockHeader> {
        let index = self.index.lock();
        let fork_height = locator
            .iter()
            .find(|hash| index.is_on_active_chain(hash))
            .and_then(|hash| index.get(hash))
            .map_or(0, |record| record.height);
        index.headers_after(fork_height, stop, limit)
    }

    /// True until the tip is recent and carries the minimum chain work; stays
    /// false once it has been false.
    pub fn is_initial_block_download(&self) -> bool {
        if self.left_ibd.load(Ordering::Relaxed) {
            return false;
        }
        let Some(tip) = self.tip() else {
            return true;
        };
        if tip.height == 0 {
            return true;
        }
        if tip.chain_work < self.params.minimum_chain_work {
            return true;
        }
        if tip.time() < self.clock.now() - self.ibd_max_tip_age {
            return true;
        }
        info!("Leaving initial block download at height {}", tip.height);
        self.left_ibd.store(true, Ordering::Relaxed);
        false
    }

    pub fn evict_expired_orphans(&self) -> usize {
        self.orphans.evict_expired(self.clock.now())
    }
}

#[cfg(test)]
#[path = "chainstate_test.rs"]
mod chainstate_test;
