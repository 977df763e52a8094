//! Sequence gap detection.

use super::GapCalculator;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

/// Calculator that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGaps;

impl GapCalculator for NoGaps {
    #[inline(always)]
    fn execute(&mut self, _peer: SocketAddr, _sequence: u64, _warmup: bool) {}
}

/// Running totals across all peers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GapStats {
    /// Messages skipped over by forward jumps.
    pub lost: u64,
    /// Number of forward jumps.
    pub gaps: u64,
    /// Messages at or below an already seen sequence number.
    pub out_of_order: u64,
}

/// Tracks the next expected sequence number per peer.
#[derive(Debug, Default)]
pub struct GapDetector {
    /// `None` until the first message after a seed fixes the baseline.
    expected: HashMap<SocketAddr, Option<u64>>,
    stats: GapStats,
}

impl GapDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> GapStats {
        self.stats
    }
}

impl GapCalculator for GapDetector {
    fn execute(&mut self, peer: SocketAddr, sequence: u64, warmup: bool) {
        if warmup {
            self.expected.insert(peer, None);
            return;
        }

        let next = self.expected.entry(peer).or_insert(None);
        let current = *next;
        match current {
            None => *next = Some(sequence.wrapping_add(1)),
            Some(expected) if sequence == expected => *next = Some(expected.wrapping_add(1)),
            Some(expected) if sequence > expected => {
                let missing = sequence - expected;
                self.stats.lost += missing;
                self.stats.gaps += 1;
                warn!(peer = %peer, expected, received = sequence, missing, "Sequence gap");
                *next = Some(sequence.wrapping_add(1));
            }
            Some(expected) => {
                self.stats.out_of_order += 1;
                debug!(peer = %peer, expected, received = sequence, "Out-of-order message");
            }
        }
    }

    fn report(&self) {
        info!(
            peers = self.expected.len(),
            lost = self.stats.lost,
            gaps = self.stats.gaps,
            out_of_order = self.stats.out_of_order,
            "Gap summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    #[test]
    fn test_in_order_has_no_gaps() {
        let mut detector = GapDetector::new();
        for seq in 10..20 {
            detector.execute(peer(1), seq, false);
        }
        assert_eq!(detector.stats(), GapStats::default());
    }

    #[test]
    fn test_forward_jump_counts_missing() {
        let mut detector = GapDetector::new();
        detector.execute(peer(1), 1, false);
        detector.execute(peer(1), 2, false);
        detector.execute(peer(1), 6, false);
        detector.execute(peer(1), 7, false);

        let stats = detector.stats();
        assert_eq!(stats.lost, 3);
        assert_eq!(stats.gaps, 1);
        assert_eq!(stats.out_of_order, 0);
    }

    #[test]
    fn test_late_message_is_out_of_order() {
        let mut detector = GapDetector::new();
        detector.execute(peer(1), 1, false);
        detector.execute(peer(1), 3, false);
        detector.execute(peer(1), 2, false);

        let stats = detector.stats();
        assert_eq!(stats.lost, 1);
        assert_eq!(stats.out_of_order, 1);
    }

    #[test]
    fn test_warmup_reseeds_without_loss() {
        let mut detector = GapDetector::new();
        detector.execute(peer(1), 100, false);

        // Client restarts its counter after a warmup.
        detector.execute(peer(1), 0, true);
        detector.execute(peer(1), 0, false);
        detector.execute(peer(1), 1, false);

        assert_eq!(detector.stats(), GapStats::default());
    }

    #[test]
    fn test_peers_tracked_independently() {
        let mut detector = GapDetector::new();
        detector.execute(peer(1), 5, false);
        detector.execute(peer(2), 50, false);
        detector.execute(peer(1), 6, false);
        detector.execute(peer(2), 51, false);

        assert_eq!(detector.stats(), GapStats::default());
    }
}
