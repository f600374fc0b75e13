//! Lock-free latency histogram with fixed cumulative buckets.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Bucket upper bounds in microseconds, from 50μs to the 5s upstream timeout.
pub const LATENCY_BUCKETS_US: [u64; 10] = [
    50,
    250,
    1_000,
    5_000,
    25_000,
    100_000,
    250_000,
    1_000_000,
    2_500_000,
    5_000_000,
];

const BUCKETS: usize = LATENCY_BUCKETS_US.len();

/// Latency distribution shared across tasks.
///
/// ```
/// use std::time::Duration;
/// use tally::metrics::Histogram;
///
/// let h = Histogram::new();
/// h.observe(Duration::from_micros(120));
/// assert_eq!(h.count(), 1);
/// assert_eq!(h.sum_us(), 120);
/// ```
pub struct Histogram {
    sum_us: AtomicU64,
    count: AtomicU64,
    buckets: [AtomicU64; BUCKETS],
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            sum_us: AtomicU64::new(0),
            count: AtomicU64::new(0),
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    #[inline]
    pub fn observe(&self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.sum_us.fetch_add(us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        // Only the first matching bucket is bumped; cumulative counts are
        // rebuilt on snapshot.
        if let Some(i) = LATENCY_BUCKETS_US.iter().position(|&le| us <= le) {
            self.buckets[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sum_us(&self) -> u64 {
        self.sum_us.load(Ordering::Relaxed)
    }

    /// Cumulative bucket counts, one per entry of [`LATENCY_BUCKETS_US`].
    pub fn cumulative(&self) -> [u64; BUCKETS] {
        let mut out = [0u64; BUCKETS];
        let mut running = 0;
        for (slot, bucket) in out.iter_mut().zip(self.buckets.iter()) {
            running += bucket.load(Ordering::Relaxed);
            *slot = running;
        }
        out
    }

    /// Renders the histogram in Prometheus text exposition format.
    pub fn format_prometheus(&self, name: &str, help: &str) -> String {
        let mut out = String::with_capacity(768);
        let _ = writeln!(out, "# HELP {} {}", name, help);
        let _ = writeln!(out, "# TYPE {} histogram", name);
        for (le, n) in LATENCY_BUCKETS_US.iter().zip(self.cumulative()) {
            let _ = writeln!(out, "{}_bucket{{le=\"{}\"}} {}", name, le, n);
        }
        let count = self.count();
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, count);
        let _ = writeln!(out, "{}_sum {}", name, self.sum_us());
        let _ = writeln!(out, "{}_count {}", name, count);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_are_cumulative() {
        let h = Histogram::new();
        h.observe(Duration::from_micros(10));
        h.observe(Duration::from_micros(300));
        h.observe(Duration::from_millis(3));
        h.observe(Duration::from_secs(60));

        let buckets = h.cumulative();
        assert_eq!(buckets[0], 1); // <= 50us
        assert_eq!(buckets[1], 1); // <= 250us
        assert_eq!(buckets[2], 2); // <= 1ms
        assert_eq!(buckets[3], 3); // <= 5ms
        assert_eq!(buckets[BUCKETS - 1], 3);
        assert_eq!(h.count(), 4);
    }

    #[test]
    fn prometheus_output_has_inf_bucket() {
        let h = Histogram::new();
        h.observe(Duration::from_micros(40));
        h.observe(Duration::from_micros(60));

        let out = h.format_prometheus("tally_test_us", "Test histogram");
        assert!(out.contains("# TYPE tally_test_us histogram"));
        assert!(out.contains("tally_test_us_bucket{le=\"50\"} 1"));
        assert!(out.contains("tally_test_us_bucket{le=\"+Inf\"} 2"));
        assert!(out.contains("tally_test_us_sum 100"));
    }

    #[test]
    fn concurrent_observations_are_not_lost() {
        use std::sync::Arc;
        use std::thread;

        let h = Arc::new(Histogram::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let h = Arc::clone(&h);
                thread::spawn(move || {
                    for i in 0..500 {
                        h.observe(Duration::from_micros(i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(h.count(), 4_000);
    }
}
