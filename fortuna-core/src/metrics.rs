// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! Metrics collection and reporting

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

const MAX_TRACKED_DURATIONS: usize = 1000;

/// Generator metrics, shared between the scheduler task and callers
#[derive(Clone)]
pub struct GeneratorMetrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    start_time: Instant,

    // Source polling
    polls_total: AtomicU64,
    polls_empty: AtomicU64,
    source_failures: AtomicU64,
    entropy_bytes_collected: AtomicU64,

    // Reseeding
    reseeds_total: AtomicU64,
    reseed_durations: RwLock<Vec<u64>>,

    // Output
    bytes_generated: AtomicU64,

    // Persistence
    checkpoints_written: AtomicU64,
    checkpoints_failed: AtomicU64,
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub polls_total: u64,
    pub polls_empty: u64,
    pub source_failures: u64,
    pub entropy_bytes_collected: u64,
    pub reseeds_total: u64,
    pub reseed_p50_micros: Option<u64>,
    pub reseed_p99_micros: Option<u64>,
    pub bytes_generated: u64,
    pub checkpoints_written: u64,
    pub checkpoints_failed: u64,
}

impl Default for GeneratorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GeneratorMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                start_time: Instant::now(),
                polls_total: AtomicU64::new(0),
                polls_empty: AtomicU64::new(0),
                source_failures: AtomicU64::new(0),
                entropy_bytes_collected: AtomicU64::new(0),
                reseeds_total: AtomicU64::new(0),
                reseed_durations: RwLock::new(Vec::with_capacity(MAX_TRACKED_DURATIONS)),
                bytes_generated: AtomicU64::new(0),
                checkpoints_written: AtomicU64::new(0),
                checkpoints_failed: AtomicU64::new(0),
            }),
        }
    }

    // Source metrics
    pub fn record_poll(&self, bytes: usize) {
        self.inner.polls_total.fetch_add(1, Ordering::Relaxed);
        self.inner
            .entropy_bytes_collected
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_empty_poll(&self) {
        self.inner.polls_total.fetch_add(1, Ordering::Relaxed);
        self.inner.polls_empty.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_failure(&self) {
        self.inner.polls_total.fetch_add(1, Ordering::Relaxed);
        self.inner.source_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn polls_total(&self) -> u64 {
        self.inner.polls_total.load(Ordering::Relaxed)
    }

    pub fn source_failures(&self) -> u64 {
        self.inner.source_failures.load(Ordering::Relaxed)
    }

    pub fn entropy_bytes_collected(&self) -> u64 {
        self.inner.entropy_bytes_collected.load(Ordering::Relaxed)
    }

    // Reseed metrics
    pub fn record_reseed(&self, duration_micros: u64) {
        self.inner.reseeds_total.fetch_add(1, Ordering::Relaxed);

        let mut durations = self.inner.reseed_durations.write();
        durations.push(duration_micros);
        if durations.len() > MAX_TRACKED_DURATIONS {
            durations.drain(0..MAX_TRACKED_DURATIONS / 2);
        }
    }

    pub fn reseeds_total(&self) -> u64 {
        self.inner.reseeds_total.load(Ordering::Relaxed)
    }

    // Output metrics
    pub fn record_bytes_generated(&self, bytes: usize) {
        self.inner
            .bytes_generated
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn bytes_generated(&self) -> u64 {
        self.inner.bytes_generated.load(Ordering::Relaxed)
    }

    // Checkpoint metrics
    pub fn record_checkpoint(&self) {
        self.inner.checkpoints_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkpoint_failure(&self) {
        self.inner.checkpoints_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn checkpoints_written(&self) -> u64 {
        self.inner.checkpoints_written.load(Ordering::Relaxed)
    }

    pub fn checkpoints_failed(&self) -> u64 {
        self.inner.checkpoints_failed.load(Ordering::Relaxed)
    }

    // Derived metrics
    pub fn uptime_seconds(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }

    pub fn reseed_percentile(&self, percentile: f64) -> Option<u64> {
        let durations = self.inner.reseed_durations.read();
        if durations.is_empty() {
            return None;
        }

        let mut sorted = durations.clone();
        sorted.sort_unstable();
        let index = ((sorted.len() as f64 * percentile).ceil() as usize).min(sorted.len() - 1);
        Some(sorted[index])
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        MetricsSnapshot {
            uptime_seconds: self.uptime_seconds(),
            polls_total: inner.polls_total.load(Ordering::Relaxed),
            polls_empty: inner.polls_empty.load(Ordering::Relaxed),
            source_failures: inner.source_failures.load(Ordering::Relaxed),
            entropy_bytes_collected: inner.entropy_bytes_collected.load(Ordering::Relaxed),
            reseeds_total: inner.reseeds_total.load(Ordering::Relaxed),
            reseed_p50_micros: self.reseed_percentile(0.50),
            reseed_p99_micros: self.reseed_percentile(0.99),
            bytes_generated: inner.bytes_generated.load(Ordering::Relaxed),
            checkpoints_written: inner.checkpoints_written.load(Ordering::Relaxed),
            checkpoints_failed: inner.checkpoints_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let metrics = GeneratorMetrics::new();

        metrics.record_poll(32);
        metrics.record_poll(16);
        metrics.record_empty_poll();
        metrics.record_source_failure();
        metrics.record_bytes_generated(1024);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.polls_total, 4);
        assert_eq!(snapshot.polls_empty, 1);
        assert_eq!(snapshot.source_failures, 1);
        assert_eq!(snapshot.entropy_bytes_collected, 48);
        assert_eq!(snapshot.bytes_generated, 1024);
        assert_eq!(snapshot.reseed_p50_micros, None);
    }

    #[test]
    fn test_reseed_percentiles() {
        let metrics = GeneratorMetrics::new();

        for i in 1..=100 {
            metrics.record_reseed(i);
        }

        assert_eq!(metrics.reseeds_total(), 100);
        let p50 = metrics.reseed_percentile(0.50).unwrap();
        assert!((45..=55).contains(&p50));
        let p99 = metrics.reseed_percentile(0.99).unwrap();
        assert!((95..=100).contains(&p99));
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = GeneratorMetrics::new();
        let clone = metrics.clone();
        clone.record_checkpoint();
        clone.record_checkpoint_failure();
        assert_eq!(metrics.checkpoints_written(), 1);
        assert_eq!(metrics.checkpoints_failed(), 1);
    }
}
