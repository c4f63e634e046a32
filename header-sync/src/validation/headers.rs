//! Header validation functionality.

use crate::chain::chainstate::RejectReason;
use crate::error::{ValidationError, ValidationResult};
use crate::types::BlockHeader;
use crate::validation::pow::{PowVerifyMode, ProofOfWork};

/// Check that each header names its predecessor in the batch as parent.
pub fn check_continuity(headers: &[BlockHeader]) -> ValidationResult<()> {
    for (index, pair) in headers.windows(2).enumerate() {
        let expected = pair[0].block_hash();
        if pair[1].prev_blockhash != expected {
            return Err(ValidationError::NonContinuous {
                index: index + 1,
                expected,
                actual: pair[1].prev_blockhash,
            });
        }
    }
    Ok(())
}

/// Screen a batch with the cheap commitment check before any header is indexed.
pub fn check_headers_pow(headers: &[BlockHeader], pow: &dyn ProofOfWork) -> ValidationResult<()> {
    for header in headers {
        if !pow.check_proof_of_work(header, PowVerifyMode::Commitment) {
            return Err(ValidationError::InvalidProofOfWork(header.block_hash()));
        }
    }
    tracing::trace!("Proof-of-work commitments valid for {} headers", headers.len());
    Ok(())
}

/// Inputs for the checks that depend on a header's position in the chain.
#[derive(Debug, Clone, Copy)]
pub struct HeaderContext {
    /// Median time past of the parent.
    pub parent_median_time: i64,
    /// Local adjusted time.
    pub now: i64,
    /// Allowed clock drift into the future, in seconds.
    pub max_future_block_time: i64,
    /// Difficulty the header must declare, when the oracle prescribes one.
    pub expected_bits: Option<u32>,
}

/// Difficulty, timestamp and version rules for a header whose parent is known.
pub fn check_contextual(header: &BlockHeader, ctx: &HeaderContext) -> Result<(), RejectReason> {
    if let Some(expected) = ctx.expected_bits {
        if header.bits != expected {
            return Err(RejectReason::BadDiffBits);
        }
    }

    let time = i64::from(header.time);
    if time <= ctx.parent_median_time {
        return Err(RejectReason::TimeTooOld);
    }
    if time > ctx.now + ctx.max_future_block_time {
        return Err(RejectReason::TimeTooNew);
    }

    if header.version < 1 {
        return Err(RejectReason::BadVersion);
    }

    Ok(())
}

#[cfg(test)]
#[path = "headers_test.rs"]
mod headers_test;
