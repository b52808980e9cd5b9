//! Counters shared by the intake, the writer and the capture loop, so that
//! silent data loss is at least visible on `/status` and in the monitor.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters; every field only ever goes up.
#[derive(Debug, Default)]
pub struct PipelineStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    throttled: AtomicU64,
    empty_skipped: AtomicU64,
    rows_written: AtomicU64,
    rows_lost: AtomicU64,
    frames_captured: AtomicU64,
    frame_log_failures: AtomicU64,
}

/// A point-in-time copy of [PipelineStats].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct StatsSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub throttled: u64,
    pub empty_skipped: u64,
    pub rows_written: u64,
    pub rows_lost: u64,
    pub frames_captured: u64,
    pub frame_log_failures: u64,
}

#[allow(missing_docs)]
impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the running total, so callers can rate-limit their logging.
    pub fn record_dropped(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty_skipped(&self, n: usize) {
        self.empty_skipped.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_written(&self, n: usize) {
        self.rows_written.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_lost(&self, n: usize) {
        self.rows_lost.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_frame(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_log_failure(&self) {
        self.frame_log_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            empty_skipped: self.empty_skipped.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            rows_lost: self.rows_lost.load(Ordering::Relaxed),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frame_log_failures: self.frame_log_failures.load(Ordering::Relaxed),
        }
    }
}
