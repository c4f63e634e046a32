//! Anti-DoS work gating for header batches.
//!
//! Outside initial block download a batch must carry enough cumulative work to
//! land within a fixed number of blocks of the tip. Weaker batches are cheap to
//! produce and are not worth indexing. The gate holds no state and takes no
//! locks.

use crate::chain::chain_work::ChainWork;
use crate::chain::index::HeaderRecord;
use crate::types::{BlockHash, BlockHeader};

/// Result of gating a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkCheck {
    Sufficient,
    Insufficient {
        total: ChainWork,
        threshold: ChainWork,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct AntiDoSGate {
    minimum_chain_work: ChainWork,
    buffer_blocks: u64,
}

impl AntiDoSGate {
    pub fn new(minimum_chain_work: ChainWork, buffer_blocks: u64) -> Self {
        Self {
            minimum_chain_work,
            buffer_blocks,
        }
    }

    /// Minimum cumulative work a batch must reach to be trusted.
    ///
    /// Zero during initial sync. Otherwise the tip's work less `buffer_blocks`
    /// blocks at the tip's difficulty, floored at the configured minimum.
    pub fn work_threshold(&self, tip: Option<&HeaderRecord>, is_initial_sync: bool) -> ChainWork {
        if is_initial_sync {
            return ChainWork::zero();
        }
        let Some(tip) = tip else {
            return self.minimum_chain_work;
        };
        let buffer = ChainWork::from_bits(tip.header.bits).saturating_mul(self.buffer_blocks);
        let near_tip = tip.chain_work.saturating_sub(buffer);
        near_tip.max(self.minimum_chain_work)
    }

    /// Sum of per-header work. Unusable difficulty encodings add nothing.
    pub fn batch_work(headers: &[BlockHeader]) -> ChainWork {
        headers
            .iter()
            .fold(ChainWork::zero(), |acc, header| acc + ChainWork::from_bits(header.bits))
    }

    /// Gate a batch whose first header extends a record with `start_work`.
    pub fn check(
        &self,
        start_work: ChainWork,
        headers: &[BlockHeader],
        tip: Option<&HeaderRecord>,
        is_initial_sync: bool,
    ) -> WorkCheck {
        let threshold = self.work_threshold(tip, is_initial_sync);
        let total = start_work + Self::batch_work(headers);
        if total >= threshold {
            WorkCheck::Sufficient
        } else {
            WorkCheck::Insufficient {
                total,
                threshold,
            }
        }
    }

    /// Whether gating can be skipped: the batch ends on a header the active
    /// chain already contains, so its work is already accounted for. Side
    /// chains never qualify.
    pub fn is_already_active(
        headers: &[BlockHeader],
        on_active_chain: impl Fn(&BlockHash) -> bool,
    ) -> bool {
        headers.last().is_some_and(|last| on_active_chain(&last.block_hash()))
    }
}
