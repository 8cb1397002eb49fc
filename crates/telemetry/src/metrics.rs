//! Internal metrics collection.
//!
//! Collects metrics in-memory and periodically flushes to ClickHouse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    pub fn set(&self, val: i64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Histogram for latency tracking.
#[derive(Debug)]
pub struct Histogram {
    /// Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 5s, 10s
    buckets: [AtomicU64; 11],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 11] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 10000];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Records a value in milliseconds.
    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for (i, &bound) in Self::BUCKET_BOUNDS.iter().enumerate() {
            if ms <= bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        // Value exceeds all buckets, add to last
        self.buckets[10].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum() as f64 / count as f64
        }
    }

    /// Returns bucket counts.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BUCKET_BOUNDS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Collected metrics for the pipeline and orchestrator.
#[derive(Debug, Default)]
pub struct Metrics {
    // Source
    pub records_polled: Counter,
    pub records_malformed: Counter,
    pub source_errors: Counter,
    pub source_pauses: Counter,

    // Dedup
    pub records_novel: Counter,
    pub records_duplicate: Counter,
    pub records_late_dropped: Counter,
    pub dedup_evictions: Counter,

    // Enrichment
    pub enrichment_misses: Counter,
    pub records_quarantined: Counter,
    pub records_miss_dropped: Counter,

    // Sink
    pub rows_written: Counter,
    pub sink_write_errors: Counter,
    pub sink_retries: Counter,
    pub batches_committed: Counter,
    pub checkpoints_written: Counter,

    // Orchestrator
    pub runs_started: Counter,
    pub runs_succeeded: Counter,
    pub runs_failed: Counter,
    pub runs_rejected: Counter,
    pub task_retries: Counter,

    // Latency histograms
    pub batch_latency_ms: Histogram,
    pub sink_latency_ms: Histogram,
    pub checkpoint_latency_ms: Histogram,

    // Gauges
    pub watermark_ms: Gauge,
    pub dedup_state_size: Gauge,
    pub source_paused: Gauge,
    pub active_runs: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub records_polled: u64,
    pub records_malformed: u64,
    pub records_novel: u64,
    pub records_duplicate: u64,
    pub records_late_dropped: u64,
    pub enrichment_misses: u64,
    pub records_quarantined: u64,
    pub rows_written: u64,
    pub sink_write_errors: u64,
    pub batches_committed: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub runs_rejected: u64,
    pub batch_latency_mean_ms: f64,
    pub sink_latency_mean_ms: f64,
    pub checkpoint_latency_mean_ms: f64,
    pub watermark_ms: i64,
    pub dedup_state_size: i64,
    pub source_paused: bool,
}

impl Metrics {
    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            records_polled: self.records_polled.get(),
            records_malformed: self.records_malformed.get(),
            records_novel: self.records_novel.get(),
            records_duplicate: self.records_duplicate.get(),
            records_late_dropped: self.records_late_dropped.get(),
            enrichment_misses: self.enrichment_misses.get(),
            records_quarantined: self.records_quarantined.get(),
            rows_written: self.rows_written.get(),
            sink_write_errors: self.sink_write_errors.get(),
            batches_committed: self.batches_committed.get(),
            runs_succeeded: self.runs_succeeded.get(),
            runs_failed: self.runs_failed.get(),
            runs_rejected: self.runs_rejected.get(),
            batch_latency_mean_ms: self.batch_latency_ms.mean(),
            sink_latency_mean_ms: self.sink_latency_ms.mean(),
            checkpoint_latency_mean_ms: self.checkpoint_latency_ms.mean(),
            watermark_ms: self.watermark_ms.get(),
            dedup_state_size: self.dedup_state_size.get(),
            source_paused: self.source_paused.get() > 0,
        }
    }
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
