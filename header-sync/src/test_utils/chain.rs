use crate::client::config::ChainParams;
use crate::types::{BlockHash, BlockHeader, Hash160};

/// Regtest difficulty used by every generated header.
const TEST_BITS: u32 = 0x207fffff;

/// A version 1 header at regtest difficulty.
pub fn test_header(prev_blockhash: BlockHash, nonce: u32, time: u32) -> BlockHeader {
    BlockHeader {
        version: 1,
        prev_blockhash,
        miner_address: Hash160::default(),
        time,
        bits: TEST_BITS,
        nonce,
        hash_randomx: [0u8; 32],
    }
}

/// Produces continuous header chains.
///
/// Different seeds give different hashes for the same parent, so two builders
/// with distinct seeds create competing branches.
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    parent_hash: BlockHash,
    parent_time: u32,
    spacing: u32,
    seed: u32,
    bits: u32,
}

impl ChainBuilder {
    /// Extend `parent`.
    pub fn new(parent: &BlockHeader) -> Self {
        Self {
            parent_hash: parent.block_hash(),
            parent_time: parent.time,
            spacing: 120,
            seed: 0,
            bits: TEST_BITS,
        }
    }

    /// Extend the genesis header of `params`.
    pub fn from_genesis(params: &ChainParams) -> Self {
        Self::new(&params.genesis).with_bits(params.pow_limit_bits)
    }

    pub fn with_spacing(mut self, spacing: u32) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_bits(mut self, bits: u32) -> Self {
        self.bits = bits;
        self
    }

    /// `count` headers, each the child of the previous one.
    pub fn build(&self, count: usize) -> Vec<BlockHeader> {
        let mut headers = Vec::with_capacity(count);
        let mut prev = self.parent_hash;
        for i in 0..count as u32 {
            let header = BlockHeader {
                bits: self.bits,
                ..test_header(
                    prev,
                    self.seed.wrapping_mul(1_000_003).wrapping_add(i),
                    self.parent_time + self.spacing * (i + 1),
                )
            };
            prev = header.block_hash();
            headers.push(header);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::headers::check_continuity;

    #[test]
    fn test_builder_chains_are_continuous() {
        let params = ChainParams::regtest();
        let headers = ChainBuilder::from_genesis(&params).build(25);
        assert_eq!(headers.len(), 25);
        assert_eq!(headers[0].prev_blockhash, params.genesis_hash());
        assert!(check_continuity(&headers).is_ok());
        assert_eq!(headers[24].time, params.genesis.time + 25 * 120);
    }

    #[test]
    fn test_seeds_fork() {
        let params = ChainParams::regtest();
        let a = ChainBuilder::from_genesis(&params).build(1);
        let b = ChainBuilder::from_genesis(&params).with_seed(1).build(1);
        assert_ne!(a[0].block_hash(), b[0].block_hash());
        assert_eq!(a[0].prev_blockhash, b[0].prev_blockhash);
    }
}
