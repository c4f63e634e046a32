//! Chain work calculation for determining the best chain
//!
//! Difficulty targets travel in the 32-bit "compact" encoding. This module
//! decodes them into 256-bit targets and converts targets into the expected
//! number of hashes needed to meet them, which is what cumulative chain work
//! sums over.

use std::fmt;
use std::ops::Add;

use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Result of decoding a compact difficulty encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactTarget {
    pub target: U256,
    pub negative: bool,
    pub overflow: bool,
}

impl CompactTarget {
    /// Decode `bits` using the sign-magnitude compact format.
    pub fn from_bits(bits: u32) -> Self {
        let size = (bits >> 24) as usize;
        let word = bits & 0x007f_ffff;

        let negative = word != 0 && (bits & 0x0080_0000) != 0;
        let overflow = word != 0
            && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));

        let target = if overflow || word == 0 {
            U256::zero()
        } else if size <= 3 {
            U256::from(word >> (8 * (3 - size)))
        } else {
            U256::from(word) << (8 * (size - 3))
        };

        Self {
            target,
            negative,
            overflow,
        }
    }

    /// A target usable for proof-of-work: non-negative, in range and non-zero.
    pub fn is_usable(&self) -> bool {
        !self.negative && !self.overflow && !self.target.is_zero()
    }
}

/// Encode a 256-bit target back into compact form.
#[cfg(test)]
fn target_to_compact(target: U256) -> u32 {
    let mut size = target.bits().div_ceil(8);
    let mut compact = if size <= 3 {
        (target.low_u64() << (8 * (3 - size))) as u32
    } else {
        (target >> (8 * (size - 3))).low_u32()
    };
    // The top mantissa bit is the sign; shift into the next exponent if set.
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }
    compact | ((size as u32) << 24)
}

/// Cumulative proof-of-work as a 256-bit integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ChainWork(U256);

impl ChainWork {
    pub fn zero() -> Self {
        Self(U256::zero())
    }

    pub fn from_u256(value: U256) -> Self {
        Self(value)
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Expected hashes to meet the target encoded by `bits`.
    ///
    /// Computes `2^256 / (target + 1)` as `(!target / (target + 1)) + 1`, which
    /// fits in 256 bits. Negative, overflowing or zero targets contribute no work.
    pub fn from_bits(bits: u32) -> Self {
        let decoded = CompactTarget::from_bits(bits);
        if !decoded.is_usable() {
            return Self::zero();
        }
        let target = decoded.target;
        Self((!target / (target + U256::one())) + U256::one())
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Multiply by a block count, saturating at the maximum value.
    pub fn saturating_mul(self, blocks: u64) -> Self {
        Self(self.0.saturating_mul(U256::from(blocks)))
    }

    /// Big-endian hex with no prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_big_endian())
    }

    /// Parse big-endian hex, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let padded = format!("{:0>64}", digits);
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&padded, &mut bytes)?;
        Ok(Self(U256::from_big_endian(&bytes)))
    }
}

impl Add for ChainWork {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        self.saturating_add(other)
    }
}

impl fmt::Display for ChainWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl Serialize for ChainWork {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChainWork {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_regtest_limit_is_two_hashes() {
        // target = 0x7fffff << 232, just under 2^255
        assert_eq!(ChainWork::from_bits(0x207fffff).as_u256(), U256::from(2u64));
    }

    #[test]
    fn test_bitcoin_genesis_work() {
        // 0x1d00ffff is the classic difficulty-1 target.
        assert_eq!(ChainWork::from_bits(0x1d00ffff).as_u256(), U256::from(0x0001_0001_0001u64));
    }

    #[test_case(0x00000000 ; "zero mantissa")]
    #[test_case(0x04923456 ; "negative")]
    #[test_case(0xff123456 ; "overflow")]
    #[test_case(0x01003456 ; "shifted to zero")]
    fn test_unusable_bits_contribute_nothing(bits: u32) {
        assert!(ChainWork::from_bits(bits).is_zero());
    }

    #[test]
    fn test_compact_decoding_flags() {
        let negative = CompactTarget::from_bits(0x04923456);
        assert!(negative.negative);
        assert!(!negative.overflow);

        let overflow = CompactTarget::from_bits(0x23000001);
        assert!(overflow.overflow);

        let small = CompactTarget::from_bits(0x03123456);
        assert_eq!(small.target, U256::from(0x123456u64));

        let tiny = CompactTarget::from_bits(0x02123456);
        assert_eq!(tiny.target, U256::from(0x1234u64));
    }

    #[test_case(0x207fffff)]
    #[test_case(0x1f0fffff)]
    #[test_case(0x1d00ffff)]
    #[test_case(0x1e270fd8)]
    fn test_compact_reencodes(bits: u32) {
        let decoded = CompactTarget::from_bits(bits);
        assert_eq!(target_to_compact(decoded.target), bits);
    }

    #[test]
    fn test_work_hex_parsing() {
        let work = ChainWork::from_hex("0x0100").unwrap();
        assert_eq!(work.as_u256(), U256::from(256u64));
        assert_eq!(ChainWork::from_hex(&work.to_hex()).unwrap(), work);
        assert!(ChainWork::from_hex("zz").is_err());
    }

    #[test]
    fn test_work_arithmetic_saturates() {
        let max = ChainWork::from_u256(U256::MAX);
        assert_eq!(max + ChainWork::from_bits(0x207fffff), max);
        assert!(ChainWork::zero().saturating_sub(max).is_zero());
        assert_eq!(
            ChainWork::from_bits(0x207fffff).saturating_mul(144).as_u256(),
            U256::from(288u64)
        );
    }
}
