//! Common type definitions for the header sync core.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Size in bytes of a serialized block header.
pub const HEADER_SIZE: usize = 100;

/// Identifier assigned to a peer connection by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer={}", self.0)
    }
}

/// Double SHA-256 hash identifying a block header.
///
/// Stored in internal (little-endian) byte order. `Display` renders the
/// byte-reversed hex form used by block explorers and RPC output.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    /// The all-zero hash. Used as the parent of genesis and as "no stop hash".
    pub const fn all_zeros() -> Self {
        Self([0u8; 32])
    }

    pub const fn from_byte_array(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn to_byte_array(self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Hash arbitrary bytes with double SHA-256.
    pub fn sha256d(data: &[u8]) -> Self {
        let first = Sha256::digest(data);
        let second = Sha256::digest(first);
        let mut out = [0u8; 32];
        out.copy_from_slice(&second);
        Self(out)
    }

    /// Parse the byte-reversed hex form produced by `Display`.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        bytes.reverse();
        Ok(Self(bytes))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self)
    }
}

/// 20-byte miner address committed to by each header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Hash160(pub [u8; 20]);

/// A block header of the headers-only chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_blockhash: BlockHash,
    pub miner_address: Hash160,
    pub time: u32,
    /// Difficulty target in compact form.
    pub bits: u32,
    pub nonce: u32,
    /// RandomX commitment checked by the proof-of-work oracle.
    pub hash_randomx: [u8; 32],
}

impl BlockHeader {
    /// Serialize into the fixed 100-byte wire layout.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(self.prev_blockhash.as_bytes());
        out[36..56].copy_from_slice(&self.miner_address.0);
        out[56..60].copy_from_slice(&self.time.to_le_bytes());
        out[60..64].copy_from_slice(&self.bits.to_le_bytes());
        out[64..68].copy_from_slice(&self.nonce.to_le_bytes());
        out[68..100].copy_from_slice(&self.hash_randomx);
        out
    }

    /// Parse the fixed 100-byte wire layout.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let u32_at = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let mut prev = [0u8; 32];
        prev.copy_from_slice(&bytes[4..36]);
        let mut miner = [0u8; 20];
        miner.copy_from_slice(&bytes[36..56]);
        let mut randomx = [0u8; 32];
        randomx.copy_from_slice(&bytes[68..100]);
        Self {
            version: u32_at(0) as i32,
            prev_blockhash: BlockHash::from_byte_array(prev),
            miner_address: Hash160(miner),
            time: u32_at(56),
            bits: u32_at(60),
            nonce: u32_at(64),
            hash_randomx: randomx,
        }
    }

    pub fn block_hash(&self) -> BlockHash {
        BlockHash::sha256d(&self.to_bytes())
    }

    /// Genesis headers have no parent.
    pub fn is_genesis_shaped(&self) -> bool {
        self.prev_blockhash.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_blockhash: BlockHash::from_byte_array([7u8; 32]),
            miner_address: Hash160([3u8; 20]),
            time: 1_700_000_000,
            bits: 0x207fffff,
            nonce: 42,
            hash_randomx: [9u8; 32],
        }
    }

    #[test]
    fn test_header_layout_is_little_endian() {
        let bytes = sample_header().to_bytes();
        assert_eq!(&bytes[0..4], &[1, 0, 0, 0]);
        assert_eq!(&bytes[4..36], &[7u8; 32]);
        assert_eq!(&bytes[36..56], &[3u8; 20]);
        assert_eq!(&bytes[60..64], &[0xff, 0xff, 0x7f, 0x20]);
        assert_eq!(&bytes[64..68], &[42, 0, 0, 0]);
        assert_eq!(&bytes[68..100], &[9u8; 32]);
    }

    #[test]
    fn test_header_parse_restores_fields() {
        let header = sample_header();
        assert_eq!(BlockHeader::from_bytes(&header.to_bytes()), header);
    }

    #[test]
    fn test_block_hash_changes_with_nonce() {
        let a = sample_header();
        let mut b = a;
        b.nonce += 1;
        assert_ne!(a.block_hash(), b.block_hash());
    }

    #[test]
    fn test_block_hash_hex_is_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let hash = BlockHash::from_byte_array(bytes);
        let shown = hash.to_string();
        assert!(shown.ends_with("ab"));
        assert_eq!(BlockHash::from_hex(&shown).unwrap(), hash);
    }

    #[test]
    fn test_sha256d_known_vector() {
        // sha256d("") = 5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456
        let hash = BlockHash::sha256d(b"");
        assert_eq!(
            hex::encode(hash.to_byte_array()),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }
}
