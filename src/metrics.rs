//! Metrics module - Tick timing and jitter statistics

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// TICK METRICS - Thread-safe loop timing
// ============================================================================

const NO_TICK: u64 = u64::MAX;

#[derive(Clone)]
pub struct TickMetrics {
    compute_hist: Arc<Mutex<Histogram<u64>>>,
    // Deviation of the measured tick-to-tick period from dt
    jitter_hist: Arc<Mutex<Histogram<u64>>>,
    // NO_TICK until the first tick is recorded
    last_tick_ns: Arc<AtomicU64>,
    ticks: Arc<AtomicU64>,
    skipped: Arc<AtomicU64>,
}

impl TickMetrics {
    pub fn new() -> Self {
        Self {
            compute_hist: Arc::new(Mutex::new(new_histogram())),
            jitter_hist: Arc::new(Mutex::new(new_histogram())),
            last_tick_ns: Arc::new(AtomicU64::new(NO_TICK)),
            ticks: Arc::new(AtomicU64::new(0)),
            skipped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record_compute(&self, duration: Duration) {
        self.compute_hist.lock().record(duration.as_nanos() as u64).ok();
    }

    /// Record a tick that ran at `at` (any monotonic offset) for interval `dt`.
    pub fn record_tick(&self, at: Duration, dt: Duration) {
        self.ticks.fetch_add(1, Ordering::Relaxed);

        let at_ns = at.as_nanos() as u64;
        let last = self.last_tick_ns.swap(at_ns, Ordering::Relaxed);
        if last != NO_TICK && at_ns > last {
            let period = at_ns - last;
            let dt_ns = dt.as_nanos() as u64;
            self.jitter_hist.lock().record(period.abs_diff(dt_ns)).ok();
        }
    }

    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn report(&self) -> MetricsReport {
        let compute = self.compute_hist.lock();
        let jitter = self.jitter_hist.lock();

        MetricsReport {
            compute_p50: Duration::from_nanos(compute.value_at_quantile(0.5)),
            compute_p99: Duration::from_nanos(compute.value_at_quantile(0.99)),
            jitter_p50: Duration::from_nanos(jitter.value_at_quantile(0.5)),
            jitter_p99: Duration::from_nanos(jitter.value_at_quantile(0.99)),
            ticks: self.ticks(),
            skipped: self.skipped(),
        }
    }
}

impl Default for TickMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn new_histogram() -> Histogram<u64> {
    // Auto-resizing, so records above the initial range are kept
    let mut hist = Histogram::new(3).expect("3 significant figures is a valid precision");
    hist.auto(true);
    hist
}

// ============================================================================
// METRICS REPORT - Summary statistics
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsReport {
    pub compute_p50: Duration,
    pub compute_p99: Duration,
    pub jitter_p50: Duration,
    pub jitter_p99: Duration,
    pub ticks: u64,
    pub skipped: u64,
}
