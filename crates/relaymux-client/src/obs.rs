//! Minimal session counters.
//!
//! No external dependencies are used; plain atomics so admin threads and
//! tests can read them while the driver runs.

use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default)]
pub struct SessionMetrics {
    pub frames_decoded: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub commands_dispatched: AtomicU64,
    pub commands_deferred: AtomicU64,
    pub responses_matched: AtomicU64,
    pub responses_orphaned: AtomicU64,
    pub reconnect_attempts: AtomicU64,
    pub heartbeat_misses: AtomicU64,
}

impl SessionMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            commands_dispatched: self.commands_dispatched.load(Ordering::Relaxed),
            commands_deferred: self.commands_deferred.load(Ordering::Relaxed),
            responses_matched: self.responses_matched.load(Ordering::Relaxed),
            responses_orphaned: self.responses_orphaned.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            heartbeat_misses: self.heartbeat_misses.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub commands_dispatched: u64,
    pub commands_deferred: u64,
    pub responses_matched: u64,
    pub responses_orphaned: u64,
    pub reconnect_attempts: u64,
    pub heartbeat_misses: u64,
}
