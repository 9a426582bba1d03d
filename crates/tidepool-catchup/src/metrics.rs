//! Metrics for bucket replay.
//!
//! Counters are fire-and-forget: the state machine marks them as events
//! happen and monitoring reads a [`snapshot`](ApplyMetrics::snapshot).

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for bucket replay events.
///
/// One `replay_start` is recorded per slot flagged for replay, one
/// `replay_success` per slot committed, and one `replay_failure` per
/// failed run attempt.
#[derive(Debug, Default)]
pub struct ApplyMetrics {
    replay_start: AtomicU64,
    replay_success: AtomicU64,
    replay_failure: AtomicU64,
}

impl ApplyMetrics {
    /// Creates new zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the start of a slot replay.
    pub fn record_start(&self) {
        self.replay_start.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successfully committed slot replay.
    pub fn record_success(&self) {
        self.replay_success.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed replay attempt.
    pub fn record_failure(&self) {
        self.replay_failure.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the counters.
    pub fn snapshot(&self) -> ApplyMetricsSnapshot {
        ApplyMetricsSnapshot {
            replay_start: self.replay_start.load(Ordering::Relaxed),
            replay_success: self.replay_success.load(Ordering::Relaxed),
            replay_failure: self.replay_failure.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`ApplyMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyMetricsSnapshot {
    pub replay_start: u64,
    pub replay_success: u64,
    pub replay_failure: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = ApplyMetrics::new();
        metrics.record_start();
        metrics.record_start();
        metrics.record_success();
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.replay_start, 2);
        assert_eq!(snapshot.replay_success, 1);
        assert_eq!(snapshot.replay_failure, 1);
    }
}
