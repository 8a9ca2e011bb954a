//! Counters for the mint workflow.
//!
//! All counters are backed by atomics for lock-free concurrent access.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Aggregated workflow metrics, shared via `Arc<Metrics>`.
pub struct Metrics {
    /// Mints that entered `Created`.
    pub mints_started: AtomicU64,
    /// Mints that reached `Finalized`.
    pub mints_finalized: AtomicU64,
    /// Mints that ended in `Failed`.
    pub mints_failed: AtomicU64,
    /// Fulfillments dropped because the request already had a value.
    pub duplicate_fulfillments: AtomicU64,
    /// Sum of start-to-finalized latencies in milliseconds.
    pub mint_latency_sum_ms: AtomicU64,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub mints_started: u64,
    pub mints_finalized: u64,
    pub mints_failed: u64,
    pub duplicate_fulfillments: u64,
    pub avg_mint_latency_ms: u64,
}

impl Metrics {
    /// Create a new zeroed metrics instance.
    pub fn new() -> Self {
        Self {
            mints_started: AtomicU64::new(0),
            mints_finalized: AtomicU64::new(0),
            mints_failed: AtomicU64::new(0),
            duplicate_fulfillments: AtomicU64::new(0),
            mint_latency_sum_ms: AtomicU64::new(0),
        }
    }

    pub fn record_start(&self) {
        self.mints_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finalized mint with its start-to-finish latency.
    pub fn record_finalized(&self, latency_ms: u64) {
        self.mints_finalized.fetch_add(1, Ordering::Relaxed);
        self.mint_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.mints_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_fulfillment(&self) {
        self.duplicate_fulfillments.fetch_add(1, Ordering::Relaxed);
    }

    /// Average start-to-finalized latency in milliseconds, or 0 if none.
    pub fn avg_latency_ms(&self) -> u64 {
        let count = self.mints_finalized.load(Ordering::Relaxed);
        if count == 0 {
            return 0;
        }
        self.mint_latency_sum_ms.load(Ordering::Relaxed) / count
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            mints_started: self.mints_started.load(Ordering::Relaxed),
            mints_finalized: self.mints_finalized.load(Ordering::Relaxed),
            mints_failed: self.mints_failed.load(Ordering::Relaxed),
            duplicate_fulfillments: self.duplicate_fulfillments.load(Ordering::Relaxed),
            avg_mint_latency_ms: self.avg_latency_ms(),
        }
    }

    /// Serialize metrics as a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_latency_ignores_failures() {
        let m = Metrics::new();
        m.record_start();
        m.record_start();
        m.record_start();
        m.record_finalized(100);
        m.record_finalized(300);
        m.record_failure();

        let snap = m.snapshot();
        assert_eq!(snap.mints_started, 3);
        assert_eq!(snap.mints_failed, 1);
        assert_eq!(snap.avg_mint_latency_ms, 200);
        assert_eq!(m.to_json()["mints_finalized"], 2);
    }

    #[test]
    fn empty_metrics_report_zero_latency() {
        assert_eq!(Metrics::default().avg_latency_ms(), 0);
    }
}
