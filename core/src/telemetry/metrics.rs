use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Counters accumulated over a single digitization run.
pub struct RunMetrics {
    inner: Mutex<Metrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub traces_processed: usize,
    pub degenerate_traces: usize,
    pub repaired_traces: usize,
    pub synthetic_baselines: usize,
}

#[derive(Default)]
struct Metrics {
    snapshot: MetricsSnapshot,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Metrics::default()),
        }
    }

    pub fn record_trace(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.snapshot.traces_processed += 1;
        }
    }

    pub fn record_degenerate(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.snapshot.degenerate_traces += 1;
        }
    }

    pub fn record_repaired(&self, count: usize) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.snapshot.repaired_traces += count;
        }
    }

    pub fn record_synthetic(&self, count: usize) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.snapshot.synthetic_baselines += count;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(metrics) = self.inner.lock() {
            metrics.snapshot
        } else {
            MetricsSnapshot::default()
        }
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}
