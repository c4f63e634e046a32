//! Connected peer descriptors.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::types::PeerId;

bitflags! {
    /// Operator-granted overrides for a peer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct PeerPermissions: u32 {
        /// Misbehavior is scored but never leads to a disconnect
        const NO_BAN = 1 << 0;
        /// Connection was requested explicitly by the operator
        const MANUAL = 1 << 1;
    }
}

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionDirection {
    Inbound,
    Outbound,
}

/// What the sync core needs to know about a connected peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    /// Address used for discouragement and bans
    pub address: String,
    pub direction: ConnectionDirection,
    pub permissions: PeerPermissions,
}

impl PeerInfo {
    pub fn outbound(id: PeerId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            direction: ConnectionDirection::Outbound,
            permissions: PeerPermissions::empty(),
        }
    }

    pub fn inbound(id: PeerId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            direction: ConnectionDirection::Inbound,
            permissions: PeerPermissions::empty(),
        }
    }

    pub fn with_permissions(mut self, permissions: PeerPermissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn is_outbound(&self) -> bool {
        self.direction == ConnectionDirection::Outbound
    }

    pub fn is_no_ban(&self) -> bool {
        self.permissions.contains(PeerPermissions::NO_BAN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_flags() {
        let peer = PeerInfo::inbound(PeerId(3), "10.0.0.3:8333")
            .with_permissions(PeerPermissions::NO_BAN | PeerPermissions::MANUAL);
        assert!(peer.is_no_ban());
        assert!(!peer.is_outbound());
        assert_eq!(peer.permissions.bits(), 0b11);
        assert!(!PeerInfo::outbound(PeerId(1), "10.0.0.1:8333").is_no_ban());
    }
}
