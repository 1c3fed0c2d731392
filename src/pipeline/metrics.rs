//! Beacon processing counters.

use std::sync::atomic::{AtomicU64, Ordering};

use super::FrameOutcome;

/// Running totals of frame outcomes.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    received: AtomicU64,
    not_ours: AtomicU64,
    malformed: AtomicU64,
    no_match: AtomicU64,
    replayed: AtomicU64,
    counter_failures: AtomicU64,
    accepted: AtomicU64,
    replay_reports_suppressed: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub not_ours: u64,
    pub malformed: u64,
    pub no_match: u64,
    pub replayed: u64,
    pub counter_failures: u64,
    pub accepted: u64,
    /// Replays rejected without a warn or audit line.
    pub replay_reports_suppressed: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one processed advertisement.
    pub fn record(&self, outcome: &FrameOutcome) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            FrameOutcome::NotOurs => &self.not_ours,
            FrameOutcome::Malformed(_) => &self.malformed,
            FrameOutcome::NoMatch => &self.no_match,
            FrameOutcome::Replayed { .. } => &self.replayed,
            FrameOutcome::CounterUnavailable { .. } => &self.counter_failures,
            FrameOutcome::Accepted(_) => &self.accepted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed_report(&self) {
        self.replay_reports_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            not_ours: self.not_ours.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            no_match: self.no_match.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            counter_failures: self.counter_failures.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            replay_reports_suppressed: self.replay_reports_suppressed.load(Ordering::Relaxed),
        }
    }
}
