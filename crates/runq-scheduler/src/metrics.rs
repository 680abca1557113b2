//! Poll counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every poll served by one engine.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    polls: AtomicU64,
    assigned: AtomicU64,
    empty: AtomicU64,
    conflicts: AtomicU64,
    paused: AtomicU64,
    scope_failures: AtomicU64,
    failovers: AtomicU64,
    timeouts: AtomicU64,
}

/// Point-in-time copy of [`QueueMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub polls: u64,
    pub assigned: u64,
    pub empty: u64,
    /// Candidates lost to a concurrent claim.
    pub conflicts: u64,
    pub paused: u64,
    pub scope_failures: u64,
    pub failovers: u64,
    pub timeouts: u64,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn assigned(&self) {
        self.assigned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn empty(&self) {
        self.empty.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn conflicts(&self, n: u64) {
        if n > 0 {
            self.conflicts.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub(crate) fn paused(&self) {
        self.paused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn scope_failure(&self) {
        self.scope_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failover(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            assigned: self.assigned.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            paused: self.paused.load(Ordering::Relaxed),
            scope_failures: self.scope_failures.load(Ordering::Relaxed),
            failovers: self.failovers.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}
