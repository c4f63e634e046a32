use std::collections::HashSet;

use parking_lot::Mutex;

use crate::chain::chain_work::CompactTarget;
use crate::chain::index::HeaderRecord;
use crate::types::{BlockHash, BlockHeader};
use crate::validation::pow::{PowVerifyMode, ProofOfWork, TargetProofOfWork};

/// Proof-of-work oracle for tests.
///
/// Accepts every header except those explicitly rejected. Optionally checks
/// hashes against their declared target for real.
#[derive(Debug, Default)]
pub struct MockPow {
    rejected: Mutex<HashSet<BlockHash>>,
    rejected_full: Mutex<HashSet<BlockHash>>,
    target_limit_bits: Option<u32>,
    expected_bits: Option<u32>,
}

impl MockPow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also require each hash to meet its target, capped at `pow_limit_bits`.
    pub fn checking_targets(pow_limit_bits: u32) -> Self {
        Self {
            target_limit_bits: Some(pow_limit_bits),
            ..Self::default()
        }
    }

    /// Require children to carry `bits`.
    pub fn with_expected_bits(mut self, bits: u32) -> Self {
        self.expected_bits = Some(bits);
        self
    }

    /// Fail `hash` in every mode.
    pub fn reject(&self, hash: BlockHash) {
        self.rejected.lock().insert(hash);
    }

    /// Fail `hash` only in the full check, so it passes batch screening.
    pub fn reject_full(&self, hash: BlockHash) {
        self.rejected_full.lock().insert(hash);
    }
}

impl ProofOfWork for MockPow {
    fn check_proof_of_work(&self, header: &BlockHeader, mode: PowVerifyMode) -> bool {
        let hash = header.block_hash();
        if self.rejected.lock().contains(&hash) {
            return false;
        }
        if mode == PowVerifyMode::Full && self.rejected_full.lock().contains(&hash) {
            return false;
        }
        match self.target_limit_bits {
            Some(limit) => TargetProofOfWork::hash_meets_target(
                header,
                header.bits,
                CompactTarget::from_bits(limit).target,
            ),
            None => true,
        }
    }

    fn expected_bits(&self, _parent: &HeaderRecord) -> Option<u32> {
        self.expected_bits
    }
}
