// metrics.rs

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Latencies kept for the rolling average.
const LATENCY_WINDOW: usize = 512;

/// Counters for one pipeline run. Shared by reference across fetch workers.
#[derive(Debug)]
pub struct FetchMetrics {
    requests_total: AtomicU64,
    failed_requests: AtomicU64,
    retries: AtomicU64,
    rate_limited: AtomicU64,

    units_planned: AtomicU64,
    units_succeeded: AtomicU64,
    units_skipped: AtomicU64,
    units_at_cap: AtomicU64,
    rows_fetched: AtomicU64,

    start_time: Instant,
    last_error: RwLock<Option<String>>,
    request_latencies: RwLock<VecDeque<f64>>,
}

impl Default for FetchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            units_planned: AtomicU64::new(0),
            units_succeeded: AtomicU64::new(0),
            units_skipped: AtomicU64::new(0),
            units_at_cap: AtomicU64::new(0),
            rows_fetched: AtomicU64::new(0),
            start_time: Instant::now(),
            last_error: RwLock::new(None),
            request_latencies: RwLock::new(VecDeque::with_capacity(LATENCY_WINDOW)),
        }
    }

    pub fn record_request(&self, latency: Duration) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let mut latencies = self.request_latencies.write();
        latencies.push_back(latency.as_secs_f64() * 1000.0);
        while latencies.len() > LATENCY_WINDOW {
            latencies.pop_front();
        }
    }

    pub fn record_error(&self, error_msg: Option<String>) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        if let Some(msg) = error_msg {
            *self.last_error.write() = Some(msg);
        }
    }

    pub fn record_retries(&self, retries: u32, rate_limited: u32) {
        self.retries.fetch_add(retries as u64, Ordering::Relaxed);
        self.rate_limited.fetch_add(rate_limited as u64, Ordering::Relaxed);
    }

    pub fn record_planned(&self, units: usize) {
        self.units_planned.fetch_add(units as u64, Ordering::Relaxed);
    }

    pub fn record_unit_success(&self, rows: usize) {
        self.units_succeeded.fetch_add(1, Ordering::Relaxed);
        self.rows_fetched.fetch_add(rows as u64, Ordering::Relaxed);
    }

    /// A unit that was planned or attempted but contributed nothing.
    pub fn record_unit_skipped(&self) {
        self.units_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// A unit whose row count reached the per-request cap.
    pub fn record_unit_at_cap(&self) {
        self.units_at_cap.fetch_add(1, Ordering::Relaxed);
    }

    fn average_latency(&self) -> f64 {
        let latencies = self.request_latencies.read();
        if latencies.is_empty() {
            return 0.0;
        }
        latencies.iter().sum::<f64>() / latencies.len() as f64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            elapsed: self.start_time.elapsed(),
            total_requests: self.requests_total.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            units_planned: self.units_planned.load(Ordering::Relaxed),
            units_succeeded: self.units_succeeded.load(Ordering::Relaxed),
            units_skipped: self.units_skipped.load(Ordering::Relaxed),
            units_at_cap: self.units_at_cap.load(Ordering::Relaxed),
            rows_fetched: self.rows_fetched.load(Ordering::Relaxed),
            average_latency_ms: self.average_latency(),
            last_error: self.last_error.read().clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub elapsed: Duration,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub retries: u64,
    pub rate_limited: u64,
    pub units_planned: u64,
    pub units_succeeded: u64,
    pub units_skipped: u64,
    /// Succeeded units that may be missing rows past the cap.
    pub units_at_cap: u64,
    pub rows_fetched: u64,
    pub average_latency_ms: f64,
    pub last_error: Option<String>,
}

impl MetricsSnapshot {
    /// True when every planned unit is accounted for as succeeded or skipped.
    pub fn is_consistent(&self) -> bool {
        self.units_planned == self.units_succeeded + self.units_skipped
    }
}
