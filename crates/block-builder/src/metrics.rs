//! Metrics collection for the chain VM

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for block production and atomic tx admission
#[derive(Debug, Default)]
pub struct VmMetrics {
    /// Build notifications delivered to consensus
    pub proposals_sent: AtomicU64,

    /// Build notifications dropped because the channel was full
    pub proposals_dropped: AtomicU64,

    /// Blocks built locally
    pub blocks_built: AtomicU64,

    /// Failed build attempts
    pub build_failures: AtomicU64,

    /// Atomic txs admitted to the queue
    pub atomic_txs_issued: AtomicU64,

    /// Atomic txs refused because the queue was full
    pub atomic_txs_rejected: AtomicU64,

    /// Blocks accepted by consensus
    pub blocks_accepted: AtomicU64,

    /// Blocks rejected by consensus
    pub blocks_rejected: AtomicU64,
}

impl VmMetrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a build notification outcome
    pub fn record_proposal(&self, sent: bool) {
        if sent {
            self.proposals_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.proposals_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a build outcome
    pub fn record_build(&self, ok: bool) {
        if ok {
            self.blocks_built.fetch_add(1, Ordering::Relaxed);
        } else {
            self.build_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an atomic tx submission outcome
    pub fn record_atomic_submission(&self, admitted: bool) {
        if admitted {
            self.atomic_txs_issued.fetch_add(1, Ordering::Relaxed);
        } else {
            self.atomic_txs_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a consensus decision
    pub fn record_decision(&self, accepted: bool) {
        if accepted {
            self.blocks_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.blocks_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get build notifications delivered
    pub fn get_proposals_sent(&self) -> u64 {
        self.proposals_sent.load(Ordering::Relaxed)
    }

    /// Get blocks built
    pub fn get_blocks_built(&self) -> u64 {
        self.blocks_built.load(Ordering::Relaxed)
    }

    /// Get blocks accepted
    pub fn get_blocks_accepted(&self) -> u64 {
        self.blocks_accepted.load(Ordering::Relaxed)
    }

    /// Fraction of build attempts that failed
    pub fn get_build_failure_rate(&self) -> f64 {
        let ok = self.blocks_built.load(Ordering::Relaxed);
        let failed = self.build_failures.load(Ordering::Relaxed);
        if ok + failed == 0 {
            return 0.0;
        }
        failed as f64 / (ok + failed) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = VmMetrics::new();

        metrics.record_proposal(true);
        metrics.record_proposal(false);
        metrics.record_build(true);
        metrics.record_build(true);
        metrics.record_build(false);
        metrics.record_build(true);

        assert_eq!(metrics.get_proposals_sent(), 1);
        assert_eq!(metrics.proposals_dropped.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.get_blocks_built(), 3);
        assert_eq!(metrics.get_build_failure_rate(), 0.25);
    }

    #[test]
    fn test_empty_failure_rate() {
        assert_eq!(VmMetrics::new().get_build_failure_rate(), 0.0);
    }
}
