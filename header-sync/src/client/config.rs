//! Configuration management for the header sync core.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chain::chain_work::{ChainWork, CompactTarget};
use crate::types::{BlockHash, BlockHeader, Hash160};

/// Chain the node participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

/// Consensus parameters relevant to header acceptance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    pub network: Network,

    /// Root of the header tree; never submitted through acceptance.
    pub genesis: BlockHeader,

    /// Easiest allowed target, in compact form.
    pub pow_limit_bits: u32,

    /// Target time between blocks in seconds.
    pub target_spacing: u32,

    /// Eclipse protection: a chain below this much work is never trusted as synced.
    pub minimum_chain_work: ChainWork,

    /// Reorganizations at least this deep are refused. Zero disables the check.
    pub suspicious_reorg_depth: u32,
}

fn genesis_header(time: u32, nonce: u32, bits: u32) -> BlockHeader {
    BlockHeader {
        version: 1,
        prev_blockhash: BlockHash::all_zeros(),
        miner_address: Hash160::default(),
        time,
        bits,
        nonce,
        hash_randomx: [0u8; 32],
    }
}

impl ChainParams {
    pub fn mainnet() -> Self {
        Self {
            network: Network::Mainnet,
            genesis: genesis_header(1_760_292_878, 633_285, 0x1e270fd8),
            pow_limit_bits: 0x1f0fffff,
            target_spacing: 120,
            minimum_chain_work: ChainWork::zero(),
            suspicious_reorg_depth: 0,
        }
    }

    pub fn testnet() -> Self {
        Self {
            network: Network::Testnet,
            genesis: genesis_header(1_760_549_555, 253, 0x1f7fffff),
            pow_limit_bits: 0x1f7fffff,
            target_spacing: 5,
            minimum_chain_work: ChainWork::zero(),
            suspicious_reorg_depth: 0,
        }
    }

    pub fn regtest() -> Self {
        Self {
            network: Network::Regtest,
            genesis: genesis_header(1_296_688_602, 2, 0x207fffff),
            pow_limit_bits: 0x207fffff,
            target_spacing: 120,
            minimum_chain_work: ChainWork::zero(),
            suspicious_reorg_depth: 0,
        }
    }

    pub fn genesis_hash(&self) -> BlockHash {
        self.genesis.block_hash()
    }
}

/// Configuration for the header sync core.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub chain: ChainParams,

    /// Blocks of work below the tip a post-sync batch may fall short by.
    pub anti_dos_buffer_blocks: u64,

    /// How long the sync peer may stay silent before it is replaced.
    pub stall_timeout: Duration,

    /// Global orphan header cap.
    pub max_orphans: usize,

    /// Orphan header cap per submitting peer.
    pub max_orphans_per_peer: usize,

    /// Orphan header lifetime.
    pub orphan_expire_time: Duration,

    /// A tip older than this keeps the node in initial block download.
    pub ibd_max_tip_age: Duration,

    /// A tip younger than this marks header sync complete.
    pub sync_max_tip_age: Duration,

    /// How far into the future a header timestamp may be.
    pub max_future_block_time: Duration,

    /// Batches no larger than this are treated as unsolicited announcements.
    pub max_unsolicited_announcement: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chain: ChainParams::mainnet(),
            anti_dos_buffer_blocks: 144,
            stall_timeout: Duration::from_secs(120),
            max_orphans: 1000,
            max_orphans_per_peer: 50,
            orphan_expire_time: Duration::from_secs(600),
            ibd_max_tip_age: Duration::from_secs(12 * 60 * 60),
            sync_max_tip_age: Duration::from_secs(3600),
            max_future_block_time: Duration::from_secs(2 * 60 * 60),
            max_unsolicited_announcement: 2,
        }
    }
}

impl SyncConfig {
    /// Create a new configuration for the given chain.
    pub fn new(chain: ChainParams) -> Self {
        Self {
            chain,
            ..Self::default()
        }
    }

    pub fn mainnet() -> Self {
        Self::new(ChainParams::mainnet())
    }

    pub fn testnet() -> Self {
        Self::new(ChainParams::testnet())
    }

    pub fn regtest() -> Self {
        Self::new(ChainParams::regtest())
    }

    /// Set the minimum chain work required to leave initial block download.
    pub fn with_minimum_chain_work(mut self, work: ChainWork) -> Self {
        self.chain.minimum_chain_work = work;
        self
    }

    pub fn with_suspicious_reorg_depth(mut self, depth: u32) -> Self {
        self.chain.suspicious_reorg_depth = depth;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_orphan_limits(mut self, global: usize, per_peer: usize) -> Self {
        self.max_orphans = global;
        self.max_orphans_per_peer = per_peer;
        self
    }

    pub fn with_orphan_expire_time(mut self, ttl: Duration) -> Self {
        self.orphan_expire_time = ttl;
        self
    }

    pub fn with_anti_dos_buffer_blocks(mut self, blocks: u64) -> Self {
        self.anti_dos_buffer_blocks = blocks;
        self
    }

    pub fn with_sync_max_tip_age(mut self, age: Duration) -> Self {
        self.sync_max_tip_age = age;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !CompactTarget::from_bits(self.chain.pow_limit_bits).is_usable() {
            return Err(format!(
                "pow_limit_bits {:#010x} is not a valid target",
                self.chain.pow_limit_bits
            ));
        }

        if !self.chain.genesis.prev_blockhash.is_zero() {
            return Err("genesis header must not reference a parent".to_string());
        }

        if self.max_orphans == 0 || self.max_orphans_per_peer == 0 {
            return Err("orphan limits must be > 0".to_string());
        }

        if self.max_orphans_per_peer > self.max_orphans {
            return Err(format!(
                "max_orphans_per_peer ({}) cannot exceed max_orphans ({})",
                self.max_orphans_per_peer, self.max_orphans
            ));
        }

        if self.stall_timeout.is_zero() {
            return Err("stall_timeout must be > 0".to_string());
        }

        if self.orphan_expire_time.is_zero() {
            return Err("orphan_expire_time must be > 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
