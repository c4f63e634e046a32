//! Proof-of-work verification oracle.
//!
//! The hashing algorithm itself lives outside this crate. Acceptance only needs
//! a yes/no answer per header and, optionally, the difficulty a child of a given
//! parent must declare.

use primitive_types::U256;

use crate::chain::chain_work::CompactTarget;
use crate::chain::index::HeaderRecord;
use crate::types::BlockHeader;

/// How much of the proof-of-work to verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowVerifyMode {
    /// Cheap check of the committed hash against the declared target. Used for
    /// whole-batch screening before any header touches the index.
    Commitment,
    /// Full recomputation. Used once per header during acceptance.
    Full,
}

pub trait ProofOfWork: Send + Sync {
    fn check_proof_of_work(&self, header: &BlockHeader, mode: PowVerifyMode) -> bool;

    /// Compact bits a child of `parent` must carry. `None` skips the check.
    fn expected_bits(&self, _parent: &HeaderRecord) -> Option<u32> {
        None
    }
}

/// Checks that the header hash meets its declared target and that the target
/// is no easier than the chain's limit. Difficulty never retargets.
#[derive(Debug, Clone)]
pub struct TargetProofOfWork {
    pow_limit_bits: u32,
    pow_limit: U256,
}

impl TargetProofOfWork {
    pub fn new(pow_limit_bits: u32) -> Self {
        Self {
            pow_limit_bits,
            pow_limit: CompactTarget::from_bits(pow_limit_bits).target,
        }
    }

    /// Whether the header hash, read as a little-endian integer, meets `bits`.
    pub fn hash_meets_target(header: &BlockHeader, bits: u32, limit: U256) -> bool {
        let decoded = CompactTarget::from_bits(bits);
        if !decoded.is_usable() || decoded.target > limit {
            return false;
        }
        U256::from_little_endian(header.block_hash().as_bytes()) <= decoded.target
    }
}

impl ProofOfWork for TargetProofOfWork {
    fn check_proof_of_work(&self, header: &BlockHeader, _mode: PowVerifyMode) -> bool {
        Self::hash_meets_target(header, header.bits, self.pow_limit)
    }

    fn expected_bits(&self, _parent: &HeaderRecord) -> Option<u32> {
        Some(self.pow_limit_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockHash, Hash160};

    fn header(bits: u32, nonce: u32) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_blockhash: BlockHash::all_zeros(),
            miner_address: Hash160::default(),
            time: 1_296_688_602,
            bits,
            nonce,
            hash_randomx: [0u8; 32],
        }
    }

    #[test]
    fn test_regtest_target_is_met_quickly() {
        let pow = TargetProofOfWork::new(0x207fffff);
        // About half of all hashes meet the regtest limit.
        let found = (0..64)
            .any(|nonce| pow.check_proof_of_work(&header(0x207fffff, nonce), PowVerifyMode::Full));
        assert!(found);
    }

    #[test]
    fn test_target_above_limit_fails() {
        let pow = TargetProofOfWork::new(0x1f0fffff);
        assert!(!pow.check_proof_of_work(&header(0x207fffff, 0), PowVerifyMode::Commitment));
    }

    #[test]
    fn test_unusable_bits_fail() {
        let pow = TargetProofOfWork::new(0x207fffff);
        assert!(!pow.check_proof_of_work(&header(0, 0), PowVerifyMode::Full));
        assert!(!pow.check_proof_of_work(&header(0x04923456, 0), PowVerifyMode::Full));
    }

    #[test]
    fn test_impossible_target_fails() {
        let pow = TargetProofOfWork::new(0x207fffff);
        // target = 1; no realistic hash meets it.
        assert!(!pow.check_proof_of_work(&header(0x01010000, 0), PowVerifyMode::Full));
    }
}
