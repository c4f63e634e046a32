use parking_lot::Mutex;

use crate::error::{NetworkError, NetworkResult};
use crate::network::{GetHeadersMessage, NetworkMessage, PeerInfo, PeerNetwork};
use crate::types::{BlockHeader, PeerId};

/// Mock peer network that records everything the coordinator asks of it.
#[derive(Debug, Default)]
pub struct MockNetwork {
    peers: Mutex<Vec<PeerInfo>>,
    sent: Mutex<Vec<(PeerId, NetworkMessage)>>,
    disconnected: Mutex<Vec<PeerId>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peers(peers: Vec<PeerInfo>) -> Self {
        Self {
            peers: Mutex::new(peers),
            ..Self::default()
        }
    }

    pub fn add_peer(&self, peer: PeerInfo) {
        self.peers.lock().push(peer);
    }

    pub fn remove_peer(&self, peer: PeerId) {
        self.peers.lock().retain(|info| info.id != peer);
    }

    pub fn sent_messages(&self) -> Vec<(PeerId, NetworkMessage)> {
        self.sent.lock().clone()
    }

    /// Drain the sent log.
    pub fn take_sent(&self) -> Vec<(PeerId, NetworkMessage)> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn getheaders_sent_to(&self, peer: PeerId) -> Vec<GetHeadersMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|(to, _)| *to == peer)
            .filter_map(|(_, message)| match message {
                NetworkMessage::GetHeaders(msg) => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn headers_sent_to(&self, peer: PeerId) -> Vec<Vec<BlockHeader>> {
        self.sent
            .lock()
            .iter()
            .filter(|(to, _)| *to == peer)
            .filter_map(|(_, message)| match message {
                NetworkMessage::Headers(headers) => Some(headers.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn disconnected(&self) -> Vec<PeerId> {
        self.disconnected.lock().clone()
    }

    pub fn was_disconnected(&self, peer: PeerId) -> bool {
        self.disconnected.lock().contains(&peer)
    }
}

impl PeerNetwork for MockNetwork {
    fn connected_peers(&self) -> Vec<PeerInfo> {
        self.peers.lock().clone()
    }

    fn send_message(&self, peer: PeerId, message: NetworkMessage) -> NetworkResult<()> {
        if !self.peers.lock().iter().any(|info| info.id == peer) {
            return Err(NetworkError::NotConnected(peer));
        }
        self.sent.lock().push((peer, message));
        Ok(())
    }

    fn disconnect_peer(&self, peer: PeerId) {
        self.remove_peer(peer);
        self.disconnected.lock().push(peer);
    }
}
