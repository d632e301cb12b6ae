//! Sweep Metrics
//!
//! Counters for scans, stop attempts and their outcomes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector for the expiration sweeper
#[derive(Debug)]
pub struct SweepMetrics {
    sweeps: AtomicU64,
    scan_failures: AtomicU64,
    stops_requested: AtomicU64,
    stops_succeeded: AtomicU64,
    stops_failed: AtomicU64,
    stops_timed_out: AtomicU64,
    skipped_in_flight: AtomicU64,
    reaped: AtomicU64,
    rearmed: AtomicU64,
    already_removed: AtomicU64,

    /// Stop latency tracking (simplified)
    stop_latency_sum_us: AtomicU64,
    stop_latency_max_us: AtomicU64,
}

impl Default for SweepMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SweepMetrics {
    pub fn new() -> Self {
        Self {
            sweeps: AtomicU64::new(0),
            scan_failures: AtomicU64::new(0),
            stops_requested: AtomicU64::new(0),
            stops_succeeded: AtomicU64::new(0),
            stops_failed: AtomicU64::new(0),
            stops_timed_out: AtomicU64::new(0),
            skipped_in_flight: AtomicU64::new(0),
            reaped: AtomicU64::new(0),
            rearmed: AtomicU64::new(0),
            already_removed: AtomicU64::new(0),
            stop_latency_sum_us: AtomicU64::new(0),
            stop_latency_max_us: AtomicU64::new(0),
        }
    }

    pub fn record_sweep(&self) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan_failure(&self) {
        self.scan_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stop_requested(&self) {
        self.stops_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stop_succeeded(&self, latency: Duration) {
        self.stops_succeeded.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    pub fn record_stop_failed(&self, latency: Duration) {
        self.stops_failed.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    pub fn record_stop_timed_out(&self) {
        self.stops_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_in_flight(&self, n: u64) {
        self.skipped_in_flight.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_reaped(&self) {
        self.reaped.fetch_add(1, Ordering::Relaxed);
    }

    /// Stop confirmed but the workspace was pinged in the meantime
    pub fn record_rearmed(&self) {
        self.rearmed.fetch_add(1, Ordering::Relaxed);
    }

    /// Stop confirmed but a stop event had already dropped the record
    pub fn record_already_removed(&self) {
        self.already_removed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, latency: Duration) {
        let latency_us = latency.as_micros() as u64;
        self.stop_latency_sum_us
            .fetch_add(latency_us, Ordering::Relaxed);
        self.stop_latency_max_us
            .fetch_max(latency_us, Ordering::Relaxed);
    }

    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    pub fn scan_failures(&self) -> u64 {
        self.scan_failures.load(Ordering::Relaxed)
    }

    pub fn stops_requested(&self) -> u64 {
        self.stops_requested.load(Ordering::Relaxed)
    }

    pub fn stops_succeeded(&self) -> u64 {
        self.stops_succeeded.load(Ordering::Relaxed)
    }

    pub fn stops_failed(&self) -> u64 {
        self.stops_failed.load(Ordering::Relaxed)
    }

    pub fn stops_timed_out(&self) -> u64 {
        self.stops_timed_out.load(Ordering::Relaxed)
    }

    pub fn skipped_in_flight(&self) -> u64 {
        self.skipped_in_flight.load(Ordering::Relaxed)
    }

    pub fn reaped(&self) -> u64 {
        self.reaped.load(Ordering::Relaxed)
    }

    pub fn rearmed(&self) -> u64 {
        self.rearmed.load(Ordering::Relaxed)
    }

    pub fn already_removed(&self) -> u64 {
        self.already_removed.load(Ordering::Relaxed)
    }

    /// Average latency of completed stop attempts in microseconds
    pub fn avg_stop_latency_us(&self) -> f64 {
        let count = self.stops_succeeded() + self.stops_failed();
        if count == 0 {
            return 0.0;
        }
        self.stop_latency_sum_us.load(Ordering::Relaxed) as f64 / count as f64
    }

    pub fn max_stop_latency_us(&self) -> u64 {
        self.stop_latency_max_us.load(Ordering::Relaxed)
    }

    /// Get a summary of metrics
    pub fn summary(&self) -> String {
        format!(
            "Sweeps: {} (failed scans {}) | Stops: requested={}, ok={}, failed={}, timed_out={}, skipped={} | Reaped: {}, rearmed={}, already_removed={} | Stop latency (µs): avg={:.1}, max={}",
            self.sweeps(),
            self.scan_failures(),
            self.stops_requested(),
            self.stops_succeeded(),
            self.stops_failed(),
            self.stops_timed_out(),
            self.skipped_in_flight(),
            self.reaped(),
            self.rearmed(),
            self.already_removed(),
            self.avg_stop_latency_us(),
            self.max_stop_latency_us()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let metrics = SweepMetrics::new();

        metrics.record_sweep();
        metrics.record_stop_requested();
        metrics.record_stop_requested();
        metrics.record_stop_succeeded(Duration::from_micros(100));
        metrics.record_stop_failed(Duration::from_micros(300));
        metrics.record_skipped_in_flight(3);

        assert_eq!(metrics.sweeps(), 1);
        assert_eq!(metrics.stops_requested(), 2);
        assert_eq!(metrics.stops_succeeded(), 1);
        assert_eq!(metrics.stops_failed(), 1);
        assert_eq!(metrics.skipped_in_flight(), 3);
        assert_eq!(metrics.max_stop_latency_us(), 300);
        assert!((metrics.avg_stop_latency_us() - 200.0).abs() < 0.1);
        assert!(metrics.summary().starts_with("Sweeps: 1"));
    }
}
