//! Headers-first synchronization core for a headers-only chain.
//!
//! This library keeps a local header chain current with remote peers while
//! bounding what any single peer can make it do:
//!
//! - Select a single outbound sync peer and download headers in batches of up to 2000
//! - Cache headers that arrive before their parent, with per-peer and global caps
//! - Gate low-work batches outside initial block download
//! - Score protocol violations per peer and discourage misbehaving addresses
//! - Detect a stalled sync peer and move on to another
//!
//! Transport, address management and persistence formats stay outside. The
//! coordinator drives them through the [`network::PeerNetwork`] trait.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use header_sync::network::{NetworkMessage, PeerInfo, PeerNetwork};
//! use header_sync::sync::{HeaderSyncCoordinator, spawn_maintenance};
//! use header_sync::time::SystemClock;
//! use header_sync::types::PeerId;
//! use header_sync::validation::TargetProofOfWork;
//! use header_sync::{NetworkResult, SyncConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! struct Transport;
//!
//! impl PeerNetwork for Transport {
//!     fn connected_peers(&self) -> Vec<PeerInfo> {
//!         vec![PeerInfo::outbound(PeerId(1), "203.0.113.7:8333")]
//!     }
//!     fn send_message(&self, _peer: PeerId, _message: NetworkMessage) -> NetworkResult<()> {
//!         Ok(())
//!     }
//!     fn disconnect_peer(&self, _peer: PeerId) {}
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let _guard = header_sync::init_console_logging(header_sync::LevelFilter::INFO)?;
//!
//!     let config = SyncConfig::mainnet();
//!     let pow = Arc::new(TargetProofOfWork::new(config.chain.pow_limit_bits));
//!     let coordinator = Arc::new(HeaderSyncCoordinator::new(
//!         config,
//!         pow,
//!         Arc::new(Transport),
//!         Arc::new(SystemClock),
//!     )?);
//!
//!     let shutdown = CancellationToken::new();
//!     let task = spawn_maintenance(coordinator.clone(), Duration::from_secs(1), shutdown.clone());
//!
//!     // Feed decoded messages to `coordinator.handle_message` from the transport.
//!
//!     shutdown.cancel();
//!     task.await?;
//!     Ok(())
//! }
//! ```

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub mod chain;
pub mod client;
pub mod error;
pub mod logging;
pub mod network;
pub mod store;
pub mod sync;
pub mod time;
pub mod types;
pub mod validation;

// Re-export main types for convenience
pub use chain::{AcceptOutcome, ChainstateManager, RejectReason};
pub use client::{ChainParams, Network, SyncConfig};
pub use error::{
    ChainError, ChainResult, HeaderSyncError, LoggingError, LoggingResult, NetworkError,
    NetworkResult, Result, StorageError, StorageResult, SyncError, SyncResult, ValidationError,
    ValidationResult,
};
pub use logging::{LogFileConfig, LoggingConfig, LoggingGuard, init_console_logging, init_logging};
pub use network::{MisbehaviorTracker, PeerNetwork};
pub use sync::{BatchOutcome, HeaderSyncCoordinator};
pub use tracing::level_filters::LevelFilter;
pub use types::{BlockHash, BlockHeader, PeerId};

/// Current version of the header-sync library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
