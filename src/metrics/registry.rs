//! Metric groups for the counting service.
//!
//! Every group is a set of relaxed atomics so recording never blocks a
//! request or the persistence worker.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::Histogram;

/// Central registry handed to the store, the upstream client and the API.
#[derive(Default)]
pub struct MetricsRegistry {
    pub requests: Arc<RequestMetrics>,
    pub persistence: Arc<PersistenceMetrics>,
    pub upstream: Arc<UpstreamMetrics>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn format_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);
        output.push_str(&self.requests.format_prometheus());
        output.push_str(&self.persistence.format_prometheus());
        output.push_str(&self.upstream.format_prometheus());
        output
    }
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} counter", name);
    let _ = writeln!(out, "{} {}", name, value);
}

/// Counting-route traffic.
#[derive(Default)]
pub struct RequestMetrics {
    pub requests_total: AtomicU64,
    pub responses_ok_total: AtomicU64,
    pub responses_unavailable_total: AtomicU64,
    pub responses_error_total: AtomicU64,
    pub latency: Histogram,
}

impl RequestMetrics {
    #[inline]
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the outcome of one counting request by status class.
    pub fn record_response(&self, status: u16, elapsed: Duration) {
        let bucket = match status {
            200..=299 => &self.responses_ok_total,
            503 => &self.responses_unavailable_total,
            _ => &self.responses_error_total,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
        self.latency.observe(elapsed);
    }

    pub fn format_prometheus(&self) -> String {
        let mut out = String::with_capacity(1024);
        counter(
            &mut out,
            "tally_requests_total",
            "Counting requests received",
            self.requests_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "tally_responses_ok_total",
            "Counting requests answered with 2xx",
            self.responses_ok_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "tally_responses_unavailable_total",
            "Counting requests answered with 503",
            self.responses_unavailable_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "tally_responses_error_total",
            "Counting requests answered with another error status",
            self.responses_error_total.load(Ordering::Relaxed),
        );
        out.push_str(
            &self
                .latency
                .format_prometheus("tally_request_latency_us", "Counting request latency"),
        );
        out
    }
}

/// Snapshot persistence activity.
#[derive(Default)]
pub struct PersistenceMetrics {
    pub flush_total: AtomicU64,
    pub flush_skipped_total: AtomicU64,
    pub flush_errors_total: AtomicU64,
    pub signals_coalesced_total: AtomicU64,
    pub corrupt_snapshots_total: AtomicU64,
    /// Last value the worker wrote or loaded.
    pub persisted_value: AtomicU64,
    pub flush_latency: Histogram,
}

impl PersistenceMetrics {
    #[inline]
    pub fn record_flush(&self, value: u64, elapsed: Duration) {
        self.flush_total.fetch_add(1, Ordering::Relaxed);
        self.persisted_value.store(value, Ordering::Relaxed);
        self.flush_latency.observe(elapsed);
    }

    #[inline]
    pub fn record_skip(&self) {
        self.flush_skipped_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_flush_error(&self) {
        self.flush_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_coalesced(&self) {
        self.signals_coalesced_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_corrupt_snapshot(&self) {
        self.corrupt_snapshots_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn format_prometheus(&self) -> String {
        let mut out = String::with_capacity(1536);
        counter(
            &mut out,
            "tally_flush_total",
            "Snapshot writes completed",
            self.flush_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "tally_flush_skipped_total",
            "Flushes skipped because the value was already persisted",
            self.flush_skipped_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "tally_flush_errors_total",
            "Snapshot writes that failed",
            self.flush_errors_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "tally_flush_signals_coalesced_total",
            "Flush signals merged into an already pending one",
            self.signals_coalesced_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "tally_corrupt_snapshots_total",
            "Corrupt snapshots ignored at startup",
            self.corrupt_snapshots_total.load(Ordering::Relaxed),
        );
        let _ = writeln!(
            out,
            "# HELP tally_persisted_value Last counter value known to be on disk"
        );
        let _ = writeln!(out, "# TYPE tally_persisted_value gauge");
        let _ = writeln!(
            out,
            "tally_persisted_value {}",
            self.persisted_value.load(Ordering::Relaxed)
        );
        out.push_str(
            &self
                .flush_latency
                .format_prometheus("tally_flush_latency_us", "Snapshot write latency"),
        );
        out
    }
}

/// Outcomes of upstream aggregation calls.
#[derive(Default)]
pub struct UpstreamMetrics {
    pub calls_total: AtomicU64,
    pub unreachable_total: AtomicU64,
    pub bad_response_total: AtomicU64,
    pub cancelled_total: AtomicU64,
    pub latency: Histogram,
}

impl UpstreamMetrics {
    #[inline]
    pub fn record_call(&self, elapsed: Duration) {
        self.calls_total.fetch_add(1, Ordering::Relaxed);
        self.latency.observe(elapsed);
    }

    pub fn format_prometheus(&self) -> String {
        let mut out = String::with_capacity(1024);
        counter(
            &mut out,
            "tally_upstream_calls_total",
            "Upstream count requests issued",
            self.calls_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "tally_upstream_unreachable_total",
            "Upstream calls failing on transport or timeout",
            self.unreachable_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "tally_upstream_bad_response_total",
            "Upstream calls answered with a non-success status or bad body",
            self.bad_response_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "tally_upstream_cancelled_total",
            "Upstream calls cancelled by the caller",
            self.cancelled_total.load(Ordering::Relaxed),
        );
        out.push_str(
            &self
                .latency
                .format_prometheus("tally_upstream_latency_us", "Upstream call latency"),
        );
        out
    }
}
