// Live run counters shared across workers. Lock-free; snapshots are
// what the metrics endpoint and the run row see.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug)]
pub struct RunMetrics {
    pub processed: AtomicU64,
    pub saved: AtomicU64,
    pub denied: AtomicU64,
    pub failed: AtomicU64,
    /// Set when a fatal (database) error aborts the run.
    pub fatal: AtomicBool,
    started: Instant,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub saved: u64,
    pub denied: u64,
    pub failed: u64,
    /// Citations processed per minute since run start.
    pub rate: f64,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            saved: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            fatal: AtomicBool::new(false),
            started: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let minutes = self.started.elapsed().as_secs_f64() / 60.0;
        MetricsSnapshot {
            processed,
            saved: self.saved.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rate: if minutes > 0.0 {
                processed as f64 / minutes
            } else {
                0.0
            },
        }
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "processed={} saved={} denied={} failed={} rate={:.1}/min",
            self.processed, self.saved, self.denied, self.failed, self.rate
        )
    }
}
