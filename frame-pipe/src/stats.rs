use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared between the pacer and whoever is watching the session.
#[derive(Debug, Default)]
pub struct PipelineStats {
    ticks: AtomicU64,
    skipped_ticks: AtomicU64,
    captured: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    capture_errors: AtomicU64,
    restarts: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub captured: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub capture_errors: u64,
    pub restarts: u64,
}

impl PipelineStats {
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self, n: u64) {
        self.skipped_ticks.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_captured(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture_error(&self) {
        self.capture_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            captured: self.captured.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}
