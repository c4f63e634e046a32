//! Headers-first synchronization with a single designated sync peer.
//!
//! The coordinator owns the sync state machine and wires batch screening,
//! per-header acceptance and misbehavior reporting together. It never blocks:
//! requests go out through [`PeerNetwork`] and replies arrive later through
//! [`handle_headers`](HeaderSyncCoordinator::handle_headers). Stall detection
//! and reselection run from [`process_timers`](HeaderSyncCoordinator::process_timers),
//! driven by an external tick.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::chain::chainstate::{AcceptOutcome, ChainstateManager, RejectReason};
use crate::client::config::SyncConfig;
use crate::error::{HeaderSyncError, NetworkError, NetworkResult, Result};
use crate::network::ban_list::BanList;
use crate::network::constants::{MAX_HEADERS_RESULTS, MAX_LOCATOR_SZ};
use crate::network::message::{GetHeadersMessage, NetworkMessage};
use crate::network::misbehavior::MisbehaviorTracker;
use crate::network::peer::PeerInfo;
use crate::network::PeerNetwork;
use crate::sync::state::SyncState;
use crate::time::Clock;
use crate::types::{BlockHash, BlockHeader, PeerId};
use crate::validation::anti_dos::{AntiDoSGate, WorkCheck};
use crate::validation::headers::{check_continuity, check_headers_pow};
use crate::validation::pow::ProofOfWork;

/// What happened to a HEADERS batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Headers went through acceptance.
    Processed {
        accepted: usize,
        orphaned: usize,
    },
    /// Dropped without penalty.
    Ignored,
    /// The peer was penalized; `disconnect` reports whether it crossed the threshold.
    Penalized {
        disconnect: bool,
    },
}

pub struct HeaderSyncCoordinator<N: PeerNetwork> {
    config: SyncConfig,
    chainstate: Arc<ChainstateManager>,
    misbehavior: Arc<MisbehaviorTracker>,
    ban_list: Arc<BanList>,
    network: Arc<N>,
    clock: Arc<dyn Clock>,
    anti_dos: AntiDoSGate,
    state: Mutex<SyncState>,
}

impl<N: PeerNetwork> HeaderSyncCoordinator<N> {
    /// Build a coordinator with its own chainstate, tracker and ban list.
    pub fn new(
        config: SyncConfig,
        pow: Arc<dyn ProofOfWork>,
        network: Arc<N>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate().map_err(HeaderSyncError::Config)?;
        let chainstate = Arc::new(ChainstateManager::new(&config, pow, clock.clone()));
        let ban_list = Arc::new(BanList::new(clock.clone()));
        Ok(Self::with_components(
            config,
            chainstate,
            Arc::new(MisbehaviorTracker::new()),
            ban_list,
            network,
            clock,
        ))
    }

    /// Build a coordinator around existing components.
    pub fn with_components(
        config: SyncConfig,
        chainstate: Arc<ChainstateManager>,
        misbehavior: Arc<MisbehaviorTracker>,
        ban_list: Arc<BanList>,
        network: Arc<N>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let anti_dos =
            AntiDoSGate::new(config.chain.minimum_chain_work, config.anti_dos_buffer_blocks);
        Self {
            config,
            chainstate,
            misbehavior,
            ban_list,
            network,
            clock,
            anti_dos,
            state: Mutex::new(SyncState::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn chainstate(&self) -> &Arc<ChainstateManager> {
        &self.chainstate
    }

    pub fn misbehavior(&self) -> &Arc<MisbehaviorTracker> {
        &self.misbehavior
    }

    pub fn ban_list(&self) -> &Arc<BanList> {
        &self.ban_list
    }

    pub fn network(&self) -> &Arc<N> {
        &self.network
    }

    pub fn sync_peer(&self) -> Option<PeerId> {
        self.state.lock().sync_peer()
    }

    /// Copy of the current sync state.
    pub fn sync_state(&self) -> SyncState {
        self.state.lock().clone()
    }

    /// Whether a partial batch from the sync peer has completed sync.
    pub fn is_sync_complete(&self) -> bool {
        self.state.lock().is_synced()
    }

    /// Whether the active tip is younger than `max_age_secs`.
    pub fn is_synced(&self, max_age_secs: i64) -> bool {
        self.chainstate
            .tip()
            .is_some_and(|tip| self.clock.now() - tip.time() < max_age_secs)
    }

    /// Pick an outbound peer as sync peer when none is assigned and ask it for
    /// headers. Returns the chosen peer.
    pub fn select_sync_peer(&self) -> Option<PeerId> {
        let mut outbound: Vec<PeerInfo> = self
            .network
            .connected_peers()
            .into_iter()
            .filter(|peer| peer.is_outbound() && !self.ban_list.should_refuse(&peer.address))
            .collect();
        outbound.sort_by_key(|peer| peer.id);

        let chosen = {
            let mut state = self.state.lock();
            if state.has_sync_peer() {
                return None;
            }
            let fresh = outbound.iter().find(|peer| !state.was_attempted(peer.id));
            let chosen = match fresh {
                Some(peer) => peer.id,
                // Every outbound peer has had a turn; start over.
                None => outbound.first()?.id,
            };
            state.assign(chosen, self.clock.now());
            chosen
        };

        tracing::info!(
            "Selected {} as sync peer at height {}",
            chosen,
            self.chainstate.tip_height()
        );
        if let Err(e) = self.request_headers_from_peer(chosen) {
            tracing::warn!("Failed to request headers from sync peer {}: {}", chosen, e);
            self.state.lock().clear_if(chosen);
            return None;
        }
        Some(chosen)
    }

    /// Send GETHEADERS with a locator starting at the tip's parent, so even a
    /// peer on the same tip replies with at least one header.
    pub fn request_headers_from_peer(&self, peer: PeerId) -> NetworkResult<()> {
        let locator = self.chainstate.locator_from_tip_parent();
        self.send_getheaders(peer, locator)
    }

    fn send_getheaders(&self, peer: PeerId, locator: Vec<BlockHash>) -> NetworkResult<()> {
        tracing::debug!("Requesting headers from {} (locator size {})", peer, locator.len());
        let message = GetHeadersMessage::new(locator, BlockHash::all_zeros());
        self.network.send_message(peer, NetworkMessage::GetHeaders(message))
    }

    /// Locator for the batch after one ending in `last`. Falls back to our
    /// tip's parent when `last` is not indexed.
    fn continuation_locator(&self, last: &BlockHash) -> Vec<BlockHash> {
        if self.chainstate.lookup(last).is_some() {
            self.chainstate.locator_from(last)
        } else {
            self.chainstate.locator_from_tip_parent()
        }
    }

    fn request_continuation(&self, peer: PeerId, last: &BlockHash) {
        let locator = self.continuation_locator(last);
        if let Err(e) = self.send_getheaders(peer, locator) {
            tracing::warn!("Failed to request more headers from {}: {}", peer, e);
        }
    }

    /// Dispatch one decoded message.
    pub fn handle_message(&self, peer: PeerId, message: NetworkMessage) {
        match message {
            NetworkMessage::Headers(headers) => {
                self.handle_headers(peer, headers);
            }
            NetworkMessage::GetHeaders(msg) => self.handle_get_headers(peer, &msg),
        }
    }

    /// A payload from `peer` failed to decode.
    pub fn on_decode_error(&self, peer: PeerId, error: &NetworkError) {
        tracing::debug!("Failed to decode message from {}: {}", peer, error);
        if error.is_oversized() {
            let disconnect = self.misbehavior.report_oversized_message(peer);
            self.apply_penalty(peer, disconnect);
        }
    }

    /// Run a HEADERS batch from `peer` through screening and acceptance.
    pub fn handle_headers(&self, peer: PeerId, headers: Vec<BlockHeader>) -> BatchOutcome {
        let now = self.clock.now();
        let is_sync_peer = {
            let mut state = self.state.lock();
            let is_sync_peer = state.is_sync_peer(peer);
            if is_sync_peer {
                state.record_headers(now, headers.len());
            }
            is_sync_peer
        };
        tracing::debug!("Received {} headers from {}", headers.len(), peer);

        if headers.len() > MAX_HEADERS_RESULTS {
            tracing::warn!(
                "Rejecting oversized headers message from {} ({} > {})",
                peer,
                headers.len(),
                MAX_HEADERS_RESULTS
            );
            let disconnect = self.misbehavior.report_oversized_message(peer);
            return self.apply_penalty(peer, disconnect);
        }

        let Some(last) = headers.last().map(BlockHeader::block_hash) else {
            self.finish_partial_batch(peer, is_sync_peer);
            return BatchOutcome::Processed {
                accepted: 0,
                orphaned: 0,
            };
        };

        if let Err(e) = check_continuity(&headers) {
            tracing::warn!("Non-continuous headers from {}: {}", peer, e);
            let disconnect = self.misbehavior.report_non_continuous_headers(peer);
            return self.apply_penalty(peer, disconnect);
        }

        if let Err(e) = check_headers_pow(&headers, self.chainstate.pow()) {
            tracing::warn!("Headers from {} failed proof-of-work screening: {}", peer, e);
            let disconnect = self.misbehavior.report_invalid_pow(peer);
            return self.apply_penalty(peer, disconnect);
        }

        let skip_dos_checks = AntiDoSGate::is_already_active(&headers, |hash| {
            self.chainstate.is_on_active_chain(hash)
        });
        let full_batch = headers.len() == MAX_HEADERS_RESULTS;

        let chain_start = self.chainstate.lookup(&headers[0].prev_blockhash);
        let mut request_gap = false;
        match &chain_start {
            None => {
                tracing::debug!(
                    "Headers from {} do not connect (first parent {})",
                    peer,
                    headers[0].prev_blockhash
                );
                if self.misbehavior.increment_unconnecting_headers(peer) {
                    let disconnect = self.misbehavior.report_too_many_unconnecting(peer);
                    self.misbehavior.reset_unconnecting_headers(peer);
                    return self.apply_penalty(peer, disconnect);
                }
                // One gap request per run of unconnecting batches.
                request_gap = self.misbehavior.unconnecting_headers(peer) == 1;
            }
            Some(start) => {
                self.misbehavior.reset_unconnecting_headers(peer);
                if !skip_dos_checks {
                    let tip = self.chainstate.tip();
                    let ibd = self.chainstate.is_initial_block_download();
                    let check = self.anti_dos.check(start.chain_work, &headers, tip.as_ref(), ibd);
                    if let WorkCheck::Insufficient {
                        total,
                        threshold,
                    } = check
                    {
                        if let Some(outcome) =
                            self.handle_low_work(peer, is_sync_peer, &headers)
                        {
                            tracing::debug!(
                                "Low-work headers from {} (work {}, threshold {})",
                                peer,
                                total,
                                threshold
                            );
                            return outcome;
                        }
                    }
                } else {
                    tracing::trace!("Skipping anti-DoS checks for {}: last header is active", peer);
                }
            }
        }

        let connects = chain_start.is_some();
        let (accepted, orphaned) =
            match self.accept_batch(peer, &headers, connects, skip_dos_checks) {
                Ok(counts) => counts,
                Err(outcome) => return outcome,
            };

        if accepted > 0 {
            if let Err(e) = self.chainstate.activate_best_chain() {
                tracing::warn!("Chain activation after batch from {} failed: {}", peer, e);
                self.state.lock().clear_if(peer);
                return BatchOutcome::Processed {
                    accepted,
                    orphaned,
                };
            }
        }

        if !connects {
            if request_gap {
                // Ask for the gap between our chain and this batch.
                if let Err(e) = self.request_headers_from_peer(peer) {
                    tracing::warn!("Failed to request missing headers from {}: {}", peer, e);
                }
            }
        } else if full_batch {
            self.request_continuation(peer, &last);
        } else {
            self.finish_partial_batch(peer, is_sync_peer);
        }

        BatchOutcome::Processed {
            accepted,
            orphaned,
        }
    }

    /// Decide what to do with a batch below the work threshold. `None` means
    /// process it anyway.
    fn handle_low_work(
        &self,
        peer: PeerId,
        is_sync_peer: bool,
        headers: &[BlockHeader],
    ) -> Option<BatchOutcome> {
        if is_sync_peer {
            if headers.len() == MAX_HEADERS_RESULTS {
                // More headers follow; their total may still clear the threshold.
                // The batch was not indexed, so ask again from our own tip.
                if let Err(e) = self.request_headers_from_peer(peer) {
                    tracing::warn!("Failed to request more headers from {}: {}", peer, e);
                }
            }
            return Some(BatchOutcome::Ignored);
        }
        if headers.len() > self.config.max_unsolicited_announcement {
            return Some(BatchOutcome::Ignored);
        }
        None
    }

    /// Submit each header to the chainstate. Returns accepted and orphaned
    /// counts, or the outcome that ended the batch early.
    ///
    /// A batch that does not connect stops caching once the orphan pool
    /// refuses more headers from `peer`; only a connecting batch is penalized
    /// for the orphan limit.
    fn accept_batch(
        &self,
        peer: PeerId,
        headers: &[BlockHeader],
        connects: bool,
        skip_dos_checks: bool,
    ) -> std::result::Result<(usize, usize), BatchOutcome> {
        let mut accepted = 0;
        let mut orphaned = 0;
        for header in headers {
            let hash = header.block_hash();
            match self.chainstate.accept_header(header, peer) {
                AcceptOutcome::Accepted(record) => {
                    self.chainstate.try_add_candidate(&record.hash);
                    accepted += 1;
                }
                AcceptOutcome::Orphaned => {
                    tracing::trace!("Header {} from {} cached as orphan", hash, peer);
                    orphaned += 1;
                }
                AcceptOutcome::Rejected(RejectReason::OrphanLimit) if !connects => {
                    tracing::debug!(
                        "Orphan pool full for {}, dropping rest of unconnecting batch",
                        peer
                    );
                    break;
                }
                AcceptOutcome::Rejected(RejectReason::OrphanLimit) => {
                    tracing::warn!("{} exceeded the orphan header limit", peer);
                    let disconnect = self.misbehavior.report_too_many_orphans(peer);
                    return Err(self.apply_penalty(peer, disconnect));
                }
                AcceptOutcome::Rejected(RejectReason::Duplicate) => {
                    if skip_dos_checks {
                        continue;
                    }
                    if self.misbehavior.has_invalid_header_hash(peer, &hash) {
                        tracing::debug!(
                            "{} resent known-invalid header {}, dropping batch",
                            peer,
                            hash
                        );
                        return Err(BatchOutcome::Ignored);
                    }
                    tracing::warn!("{} sent known-invalid header {}", peer, hash);
                    self.misbehavior.note_invalid_header_hash(peer, hash);
                    let disconnect = self.misbehavior.report_invalid_header(peer, "duplicate");
                    return Err(self.apply_penalty(peer, disconnect));
                }
                AcceptOutcome::Rejected(reason) => {
                    tracing::warn!("{} sent invalid header {}: {}", peer, hash, reason);
                    self.misbehavior.note_invalid_header_hash(peer, hash);
                    let disconnect = self.misbehavior.report_invalid_header(peer, reason.as_str());
                    return Err(self.apply_penalty(peer, disconnect));
                }
            }
        }
        Ok((accepted, orphaned))
    }

    /// A partial batch from the sync peer means it has nothing more. Either we
    /// are caught up or another peer should be tried.
    fn finish_partial_batch(&self, peer: PeerId, is_sync_peer: bool) {
        if !is_sync_peer {
            return;
        }
        let caught_up = self.is_synced(self.config.sync_max_tip_age.as_secs() as i64);
        let height = self.chainstate.tip_height();
        let mut state = self.state.lock();
        if caught_up {
            if !state.is_synced() {
                state.set_synced(true);
                tracing::info!("Headers sync complete at height {} via {}", height, peer);
            }
        } else if state.clear_if(peer) {
            tracing::debug!("Sync peer {} has no more headers but tip is stale, releasing", peer);
        }
    }

    /// Release the sync role after a violation and disconnect when asked.
    fn apply_penalty(&self, peer: PeerId, disconnect: bool) -> BatchOutcome {
        self.state.lock().release(peer);
        if disconnect {
            if let Some(address) = self.misbehavior.address(peer) {
                self.ban_list.discourage(&address);
            }
            tracing::info!("Disconnecting misbehaving {}", peer);
            self.network.disconnect_peer(peer);
        }
        BatchOutcome::Penalized {
            disconnect,
        }
    }

    /// Answer a GETHEADERS from the active chain.
    pub fn handle_get_headers(&self, peer: PeerId, msg: &GetHeadersMessage) {
        if msg.locator_hashes.len() > MAX_LOCATOR_SZ {
            tracing::warn!(
                "Oversized locator from {} ({} > {})",
                peer,
                msg.locator_hashes.len(),
                MAX_LOCATOR_SZ
            );
            let disconnect = self.misbehavior.report_oversized_message(peer);
            self.apply_penalty(peer, disconnect);
            return;
        }

        let headers = self.chainstate.headers_for_locator(
            &msg.locator_hashes,
            &msg.stop_hash,
            MAX_HEADERS_RESULTS,
        );
        tracing::debug!("Sending {} headers to {}", headers.len(), peer);
        if let Err(e) = self.network.send_message(peer, NetworkMessage::Headers(headers)) {
            tracing::warn!("Failed to send headers to {}: {}", peer, e);
        }
    }

    /// Periodic maintenance: expire orphans and bans, detect a stalled sync
    /// peer, and select a new one when needed.
    pub fn process_timers(&self) {
        let now = self.clock.now();
        let evicted = self.chainstate.evict_expired_orphans();
        if evicted > 0 {
            tracing::debug!("Evicted {} expired orphan headers", evicted);
        }
        self.ban_list.sweep_expired();

        let timeout = self.config.stall_timeout.as_secs() as i64;
        let (stalled, needs_peer) = {
            let mut state = self.state.lock();
            if state.is_stalled(now, timeout) {
                let last = state.last_headers_received();
                (state.clear().map(|peer| (peer, now - last)), false)
            } else {
                (None, !state.has_sync_peer() && !state.is_synced())
            }
        };

        if let Some((peer, silent_for)) = stalled {
            tracing::info!(
                "Sync peer {} stalled ({}s without headers), releasing",
                peer,
                silent_for
            );
            return;
        }
        if needs_peer {
            self.select_sync_peer();
        }
    }

    /// Register a new connection. Returns false when the address is refused,
    /// in which case the peer has been disconnected.
    pub fn on_peer_connected(&self, info: PeerInfo) -> bool {
        if !info.is_no_ban() && self.ban_list.should_refuse(&info.address) {
            tracing::info!("Refusing {} from banned or discouraged {}", info.id, info.address);
            self.network.disconnect_peer(info.id);
            return false;
        }
        tracing::debug!("{} connected from {}", info.id, info.address);
        self.misbehavior.register_peer(&info);
        true
    }

    pub fn on_peer_disconnected(&self, peer: PeerId) {
        self.misbehavior.remove_peer(peer);
        let was_sync_peer = {
            let mut state = self.state.lock();
            let was_sync_peer = state.is_sync_peer(peer);
            state.forget_peer(peer);
            was_sync_peer
        };
        if was_sync_peer {
            tracing::info!("Sync peer {} disconnected", peer);
        }
    }
}

#[cfg(test)]
#[path = "coordinator_test.rs"]
mod coordinator_test;
