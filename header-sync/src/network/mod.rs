//! Peer-facing protocol pieces: wire messages, misbehavior scoring and bans.

pub mod ban_list;
pub mod constants;
pub mod message;
pub mod misbehavior;
pub mod peer;

pub use ban_list::{BanEntry, BanList, BanStore, MemoryBanStore};
pub use message::{GetHeadersMessage, NetworkMessage};
pub use misbehavior::{MisbehaviorTracker, PeerMisbehaviorSnapshot};
pub use peer::{ConnectionDirection, PeerInfo, PeerPermissions};

use crate::error::NetworkResult;
use crate::types::PeerId;

/// Connection-management capability the sync coordinator drives.
///
/// Implemented by whatever owns the transport. Calls must not block on I/O;
/// queue the work and return.
pub trait PeerNetwork: Send + Sync {
    /// Currently connected peers, in no particular order.
    fn connected_peers(&self) -> Vec<PeerInfo>;

    fn send_message(&self, peer: PeerId, message: NetworkMessage) -> NetworkResult<()>;

    fn disconnect_peer(&self, peer: PeerId);
}
