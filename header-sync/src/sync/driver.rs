//! Background task driving periodic sync maintenance.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::network::PeerNetwork;
use crate::sync::coordinator::HeaderSyncCoordinator;

/// Default interval between maintenance ticks
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);

/// Run [`HeaderSyncCoordinator::process_timers`] every `interval` until
/// `shutdown_token` is cancelled.
///
/// The first tick fires immediately. Must be called from within a tokio runtime.
pub fn spawn_maintenance<N>(
    coordinator: Arc<HeaderSyncCoordinator<N>>,
    interval: Duration,
    shutdown_token: CancellationToken,
) -> JoinHandle<()>
where
    N: PeerNetwork + 'static,
{
    tokio::spawn(async move {
        tracing::debug!("Starting sync maintenance loop (interval {:?})", interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    tracing::info!("Sync maintenance loop stopped - shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    coordinator.process_timers();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::config::SyncConfig;
    use crate::network::PeerInfo;
    use crate::test_utils::{MockClock, MockNetwork, MockPow};
    use crate::types::PeerId;

    #[tokio::test]
    async fn test_maintenance_selects_sync_peer_and_stops_on_cancel() {
        let network = Arc::new(MockNetwork::with_peers(vec![PeerInfo::outbound(
            PeerId(1),
            "10.0.0.1:8333",
        )]));
        let clock = Arc::new(MockClock::new(1_700_000_000));
        let coordinator = Arc::new(
            HeaderSyncCoordinator::new(
                SyncConfig::regtest(),
                Arc::new(MockPow::new()),
                network.clone(),
                clock,
            )
            .unwrap(),
        );

        let token = CancellationToken::new();
        let handle =
            spawn_maintenance(coordinator.clone(), Duration::from_millis(10), token.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coordinator.sync_peer(), Some(PeerId(1)));
        assert_eq!(network.getheaders_sent_to(PeerId(1)).len(), 1);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
