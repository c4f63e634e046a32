//! Header sync between coordinators linked in memory.
//!
//! Every message crosses the wire codec, so these tests also cover the
//! HEADERS and GETHEADERS payload formats end to end.

use std::sync::Arc;

use header_sync::network::{NetworkMessage, PeerInfo};
use header_sync::test_utils::{ChainBuilder, MockClock, MockNetwork, MockPow};
use header_sync::{
    AcceptOutcome, BlockHash, BlockHeader, HeaderSyncCoordinator, PeerId, SyncConfig,
};

/// How every server sees the syncing client.
const CLIENT: PeerId = PeerId(100);

struct Node {
    coordinator: HeaderSyncCoordinator<MockNetwork>,
    network: Arc<MockNetwork>,
}

impl Node {
    fn new(clock: &Arc<MockClock>, peers: Vec<PeerInfo>) -> Self {
        let network = Arc::new(MockNetwork::new());
        let coordinator = HeaderSyncCoordinator::new(
            SyncConfig::regtest(),
            Arc::new(MockPow::new()),
            network.clone(),
            clock.clone(),
        )
        .unwrap();
        for peer in peers {
            network.add_peer(peer.clone());
            assert!(coordinator.on_peer_connected(peer));
        }
        Self {
            coordinator,
            network,
        }
    }

    fn server(clock: &Arc<MockClock>) -> Self {
        Self::new(clock, vec![PeerInfo::inbound(CLIENT, "192.0.2.100:40000")])
    }

    fn client(clock: &Arc<MockClock>, servers: &[PeerId]) -> Self {
        let peers = servers
            .iter()
            .map(|id| PeerInfo::outbound(*id, format!("198.51.100.{}:8333", id.0)))
            .collect();
        Self::new(clock, peers)
    }

    fn preload(&self, headers: &[BlockHeader]) {
        let chainstate = self.coordinator.chainstate();
        for header in headers {
            assert!(matches!(
                chainstate.accept_header(header, PeerId(0)),
                AcceptOutcome::Accepted(_)
            ));
        }
        if let Some(last) = headers.last() {
            chainstate.try_add_candidate(&last.block_hash());
        }
        chainstate.activate_best_chain().unwrap();
    }

    fn tip_hash(&self) -> BlockHash {
        self.coordinator.chainstate().tip().unwrap().hash
    }

    fn tip_height(&self) -> u32 {
        self.coordinator.chainstate().tip_height()
    }
}

fn deliver(to: &Node, from: PeerId, message: NetworkMessage) {
    let payload = message.encode_payload();
    let decoded = NetworkMessage::decode(message.command(), &payload).unwrap();
    assert_eq!(decoded, message);
    to.coordinator.handle_message(from, decoded);
}

/// Shuttle messages between `client` and `servers` until everyone is quiet.
/// Messages to peers not listed are dropped. Returns how many were delivered.
fn pump(client: &Node, servers: &[(PeerId, &Node)]) -> usize {
    let mut delivered = 0;
    loop {
        let mut moved = false;
        for (to, message) in client.network.take_sent() {
            moved = true;
            if let Some((_, server)) = servers.iter().find(|(id, _)| *id == to) {
                deliver(server, CLIENT, message);
                delivered += 1;
            }
        }
        for (id, server) in servers {
            for (_, message) in server.network.take_sent() {
                moved = true;
                deliver(client, *id, message);
                delivered += 1;
            }
        }
        if !moved {
            return delivered;
        }
        assert!(delivered < 100, "sync did not converge");
    }
}

/// Clock set just after the last header of `headers`.
fn clock_after(headers: &[BlockHeader]) -> Arc<MockClock> {
    let last = headers.last().map_or(0, |header| header.time);
    Arc::new(MockClock::new(i64::from(last) + 60))
}

#[test]
fn test_sync_from_genesis_in_batches() {
    let params = SyncConfig::regtest().chain;
    let chain = ChainBuilder::from_genesis(&params).build(2_500);
    let clock = clock_after(&chain);

    let server_id = PeerId(1);
    let server = Node::server(&clock);
    server.preload(&chain);
    let client = Node::client(&clock, &[server_id]);

    assert_eq!(client.coordinator.select_sync_peer(), Some(server_id));
    // GETHEADERS, 2000 headers, GETHEADERS, 500 headers.
    assert_eq!(pump(&client, &[(server_id, &server)]), 4);

    assert_eq!(client.tip_height(), 2_500);
    assert_eq!(client.tip_hash(), server.tip_hash());
    assert!(client.coordinator.is_sync_complete());
    assert_eq!(client.coordinator.misbehavior().misbehavior_score(server_id), 0);
}

#[test]
fn test_matching_tips_still_exchange_a_header() {
    let params = SyncConfig::regtest().chain;
    let chain = ChainBuilder::from_genesis(&params).build(100);
    let clock = clock_after(&chain);

    let server_id = PeerId(1);
    let server = Node::server(&clock);
    server.preload(&chain);
    let client = Node::client(&clock, &[server_id]);
    client.preload(&chain);

    client.coordinator.select_sync_peer();
    for (_, request) in client.network.take_sent() {
        deliver(&server, CLIENT, request);
    }
    let replies = server.network.headers_sent_to(CLIENT);
    assert_eq!(replies, vec![vec![chain[99]]]);

    pump(&client, &[(server_id, &server)]);
    assert!(client.coordinator.is_sync_complete());
    assert_eq!(client.tip_hash(), server.tip_hash());
}

#[test]
fn test_client_on_weaker_fork_reorganizes() {
    let params = SyncConfig::regtest().chain;
    let main = ChainBuilder::from_genesis(&params).build(300);
    let fork = ChainBuilder::from_genesis(&params).with_seed(9).build(50);
    let clock = clock_after(&main);

    let server_id = PeerId(1);
    let server = Node::server(&clock);
    server.preload(&main);
    let client = Node::client(&clock, &[server_id]);
    client.preload(&fork);
    assert_eq!(client.tip_hash(), fork[49].block_hash());

    client.coordinator.select_sync_peer();
    pump(&client, &[(server_id, &server)]);

    assert_eq!(client.tip_hash(), server.tip_hash());
    assert!(!client.coordinator.chainstate().is_on_active_chain(&fork[49].block_hash()));
    // The abandoned branch stays indexed.
    assert!(client.coordinator.chainstate().lookup(&fork[49].block_hash()).is_some());
}

#[test]
fn test_stalled_server_is_replaced() {
    let params = SyncConfig::regtest().chain;
    let chain = ChainBuilder::from_genesis(&params).build(300);
    let clock = clock_after(&chain);

    let silent_id = PeerId(1);
    let healthy_id = PeerId(2);
    let healthy = Node::server(&clock);
    healthy.preload(&chain);
    let client = Node::client(&clock, &[silent_id, healthy_id]);

    assert_eq!(client.coordinator.select_sync_peer(), Some(silent_id));
    // The silent server never answers.
    assert_eq!(pump(&client, &[(healthy_id, &healthy)]), 0);

    clock.advance(121);
    client.coordinator.process_timers();
    assert_eq!(client.coordinator.sync_peer(), None);

    client.coordinator.process_timers();
    assert_eq!(client.coordinator.sync_peer(), Some(healthy_id));
    pump(&client, &[(healthy_id, &healthy)]);

    assert_eq!(client.tip_hash(), healthy.tip_hash());
    assert_eq!(client.coordinator.misbehavior().misbehavior_score(silent_id), 0);
    assert!(!client.network.was_disconnected(silent_id));
}

#[test]
fn test_sync_peer_disconnect_fails_over() {
    let params = SyncConfig::regtest().chain;
    let chain = ChainBuilder::from_genesis(&params).build(50);
    let clock = clock_after(&chain);

    let first_id = PeerId(1);
    let second_id = PeerId(2);
    let second = Node::server(&clock);
    second.preload(&chain);
    let client = Node::client(&clock, &[first_id, second_id]);

    assert_eq!(client.coordinator.select_sync_peer(), Some(first_id));
    client.network.remove_peer(first_id);
    client.coordinator.on_peer_disconnected(first_id);

    client.coordinator.process_timers();
    assert_eq!(client.coordinator.sync_peer(), Some(second_id));
    pump(&client, &[(second_id, &second)]);
    assert_eq!(client.tip_height(), 50);
}
