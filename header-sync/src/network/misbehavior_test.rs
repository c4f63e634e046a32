//! Tests for peer misbehavior scoring.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::network::constants::misbehavior_scores;
    use crate::network::peer::{PeerInfo, PeerPermissions};
    use crate::types::{BlockHash, PeerId};
    use std::sync::Arc;
    use std::thread;

    fn tracker_with(peers: &[PeerInfo]) -> MisbehaviorTracker {
        let tracker = MisbehaviorTracker::new();
        for peer in peers {
            tracker.register_peer(peer);
        }
        tracker
    }

    fn outbound(id: u64) -> PeerInfo {
        PeerInfo::outbound(PeerId(id), format!("10.0.0.{}:8333", id))
    }

    #[test]
    fn test_threshold_is_reached_at_exactly_100() {
        let tracker = tracker_with(&[outbound(1), outbound(2)]);

        assert!(!tracker.penalize(PeerId(1), 99, "test"));
        assert_eq!(tracker.misbehavior_score(PeerId(1)), 99);
        assert!(!tracker.should_disconnect(PeerId(1)));

        assert!(tracker.penalize(PeerId(2), 100, "test"));
        assert!(tracker.should_disconnect(PeerId(2)));
    }

    #[test]
    fn test_disconnect_stays_requested() {
        let tracker = tracker_with(&[outbound(1)]);
        assert!(tracker.penalize(PeerId(1), 100, "test"));
        assert!(tracker.penalize(PeerId(1), 1, "test"));
        assert_eq!(tracker.misbehavior_score(PeerId(1)), 101);
    }

    #[test]
    fn test_no_ban_peer_records_score_without_disconnect() {
        let peer = outbound(7).with_permissions(PeerPermissions::NO_BAN);
        let tracker = tracker_with(&[peer]);

        for _ in 0..3 {
            assert!(!tracker.penalize(PeerId(7), 100, "test"));
        }
        assert_eq!(tracker.misbehavior_score(PeerId(7)), 300);
        assert!(!tracker.should_disconnect(PeerId(7)));
        let snapshot = tracker.snapshot();
        assert!(!snapshot[0].discouraged);
    }

    #[test]
    fn test_manual_permission_does_not_protect() {
        let peer = outbound(8).with_permissions(PeerPermissions::MANUAL);
        let tracker = tracker_with(&[peer]);
        assert!(tracker.report_invalid_pow(PeerId(8)));
    }

    #[test]
    fn test_five_non_continuous_reports_disconnect() {
        let tracker = tracker_with(&[outbound(1)]);
        for _ in 0..4 {
            assert!(!tracker.report_non_continuous_headers(PeerId(1)));
        }
        assert_eq!(tracker.misbehavior_score(PeerId(1)), 80);
        assert!(tracker.report_non_continuous_headers(PeerId(1)));
        assert_eq!(tracker.misbehavior_score(PeerId(1)), 100);
    }

    #[test]
    fn test_four_non_continuous_reports_do_not_disconnect() {
        let tracker = tracker_with(&[outbound(1)]);
        for _ in 0..4 {
            tracker.report_non_continuous_headers(PeerId(1));
        }
        assert_eq!(tracker.misbehavior_score(PeerId(1)), 80);
        assert!(!tracker.should_disconnect(PeerId(1)));
    }

    #[test]
    fn test_penalty_table() {
        let tracker = tracker_with(&(1..=7).map(outbound).collect::<Vec<_>>());
        tracker.report_invalid_pow(PeerId(1));
        tracker.report_invalid_header(PeerId(2), "bad-diffbits");
        tracker.report_oversized_message(PeerId(3));
        tracker.report_non_continuous_headers(PeerId(4));
        tracker.report_low_work_headers(PeerId(5));
        tracker.report_too_many_unconnecting(PeerId(6));
        tracker.report_too_many_orphans(PeerId(7));

        let scores: Vec<u32> = (1..=7).map(|id| tracker.misbehavior_score(PeerId(id))).collect();
        assert_eq!(
            scores,
            vec![
                misbehavior_scores::INVALID_POW,
                misbehavior_scores::INVALID_HEADER,
                misbehavior_scores::OVERSIZED_MESSAGE,
                misbehavior_scores::NON_CONTINUOUS_HEADERS,
                misbehavior_scores::LOW_WORK_HEADERS,
                misbehavior_scores::TOO_MANY_UNCONNECTING,
                misbehavior_scores::TOO_MANY_ORPHANS,
            ]
        );
        assert_eq!(scores, vec![100, 100, 20, 20, 10, 100, 100]);
    }

    #[test]
    fn test_removing_one_peer_leaves_others_alone() {
        let tracker = tracker_with(&[outbound(1), outbound(2)]);
        assert!(tracker.report_invalid_pow(PeerId(1)));
        assert_eq!(tracker.misbehavior_score(PeerId(2)), 0);

        tracker.remove_peer(PeerId(1));
        assert_eq!(tracker.misbehavior_score(PeerId(1)), 0);
        assert!(!tracker.should_disconnect(PeerId(1)));
        assert_eq!(tracker.misbehavior_score(PeerId(2)), 0);
        assert_eq!(tracker.peer_count(), 1);
    }

    #[test]
    fn test_unknown_peer_is_never_disconnected() {
        let tracker = MisbehaviorTracker::new();
        assert!(!tracker.penalize(PeerId(42), 500, "test"));
        assert!(!tracker.increment_unconnecting_headers(PeerId(42)));
        assert_eq!(tracker.misbehavior_score(PeerId(42)), 0);
    }

    #[test]
    fn test_reconnect_starts_from_zero() {
        let tracker = tracker_with(&[outbound(1)]);
        tracker.penalize(PeerId(1), 60, "test");
        tracker.remove_peer(PeerId(1));
        tracker.register_peer(&outbound(1));
        assert_eq!(tracker.misbehavior_score(PeerId(1)), 0);
    }

    #[test]
    fn test_unconnecting_counter() {
        let tracker = tracker_with(&[outbound(1)]);
        for _ in 0..9 {
            assert!(!tracker.increment_unconnecting_headers(PeerId(1)));
        }
        assert!(tracker.increment_unconnecting_headers(PeerId(1)));
        assert_eq!(tracker.unconnecting_headers(PeerId(1)), 10);
        // The counter is separate from the score.
        assert_eq!(tracker.misbehavior_score(PeerId(1)), 0);

        tracker.reset_unconnecting_headers(PeerId(1));
        assert_eq!(tracker.unconnecting_headers(PeerId(1)), 0);
        assert!(!tracker.increment_unconnecting_headers(PeerId(1)));
    }

    #[test]
    fn test_invalid_header_hashes_are_per_peer() {
        let tracker = tracker_with(&[outbound(1), outbound(2)]);
        let hash = BlockHash::from_byte_array([3u8; 32]);

        assert!(!tracker.has_invalid_header_hash(PeerId(1), &hash));
        tracker.note_invalid_header_hash(PeerId(1), hash);
        assert!(tracker.has_invalid_header_hash(PeerId(1), &hash));
        assert!(!tracker.has_invalid_header_hash(PeerId(2), &hash));
    }

    #[test]
    fn test_snapshot_serializes() {
        let tracker = tracker_with(&[outbound(2), outbound(1)]);
        tracker.report_oversized_message(PeerId(1));
        tracker.increment_unconnecting_headers(PeerId(2));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].peer, PeerId(1));
        assert_eq!(snapshot[0].score, 20);
        assert_eq!(snapshot[1].unconnecting_headers, 1);

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: Vec<PeerMisbehaviorSnapshot> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_concurrent_penalties_are_not_lost() {
        let tracker = Arc::new(tracker_with(&[outbound(1)]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    for _ in 0..50 {
                        tracker.penalize(PeerId(1), 1, "test");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.misbehavior_score(PeerId(1)), 400);
        assert!(tracker.should_disconnect(PeerId(1)));
    }
}
