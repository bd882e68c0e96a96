//! Metrics collection and reporting for cefnd.
//!
//! Lock-free counters shared between the event loop, the transmission
//! pipeline and the control channel.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/* ---------------------------------------------------------------- *
 * Counter / Gauge
 * ---------------------------------------------------------------- */

/// Monotonic event counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn increment(&self) {
        self.add(1);
    }

    pub fn add(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

impl Clone for Counter {
    fn clone(&self) -> Self {
        Self(AtomicU64::new(self.value()))
    }
}

/// Current level of something (table sizes, queue depths).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero.
    pub fn decrement(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Clone for Gauge {
    fn clone(&self) -> Self {
        Self(AtomicU64::new(self.value()))
    }
}

/* ---------------------------------------------------------------- *
 * Histogram
 * ---------------------------------------------------------------- */

/// Bucketed distribution; values above the last boundary land in
/// `overflow`, values below the first in `underflow`.
#[derive(Debug)]
pub struct Histogram {
    boundaries: Vec<u64>,
    buckets: Vec<AtomicU64>,
    underflow: AtomicU64,
    overflow: AtomicU64,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(boundaries: Vec<u64>) -> Self {
        let buckets = boundaries.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            boundaries,
            buckets,
            underflow: AtomicU64::new(0),
            overflow: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// `buckets` boundaries growing geometrically from `min` to `max`.
    pub fn exponential(min: u64, max: u64, buckets: usize) -> Self {
        let min = min.max(1);
        let buckets = buckets.max(2);
        let factor = (max.max(min + 1) as f64 / min as f64).powf(1.0 / (buckets as f64 - 1.0));
        let mut boundaries = Vec::with_capacity(buckets);
        let mut value = min as f64;
        for _ in 0..buckets {
            let b = value.ceil() as u64;
            if boundaries.last().map_or(true, |&last| b > last) {
                boundaries.push(b);
            }
            value *= factor;
        }
        Self::new(boundaries)
    }

    pub fn observe(&self, value: u64) {
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        match self.boundaries.first() {
            Some(&first) if value < first => {
                self.underflow.fetch_add(1, Ordering::Relaxed);
            }
            _ => match self.boundaries.iter().position(|&b| value <= b) {
                Some(idx) => {
                    self.buckets[idx].fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    self.overflow.fetch_add(1, Ordering::Relaxed);
                }
            },
        }
    }

    pub fn average(&self) -> f64 {
        match self.count() {
            0 => 0.0,
            c => self.sum() as f64 / c as f64,
        }
    }

    pub fn counts(&self) -> Vec<(u64, u64)> {
        self.boundaries
            .iter()
            .zip(&self.buckets)
            .map(|(&b, bucket)| (b, bucket.load(Ordering::Relaxed)))
            .collect()
    }

    pub fn overflow(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }
}

impl Clone for Histogram {
    fn clone(&self) -> Self {
        let copy = |a: &AtomicU64| AtomicU64::new(a.load(Ordering::Relaxed));
        Self {
            boundaries: self.boundaries.clone(),
            buckets: self.buckets.iter().map(copy).collect(),
            underflow: copy(&self.underflow),
            overflow: copy(&self.overflow),
            sum: copy(&self.sum),
            count: copy(&self.count),
        }
    }
}

/* ---------------------------------------------------------------- *
 * Aggregate metrics for the forwarder
 * ---------------------------------------------------------------- */

#[derive(Debug, Clone)]
pub struct ForwarderMetrics {
    // Interest path
    pub interests_received: Counter,
    pub interests_forwarded: Counter,
    pub interests_aggregated: Counter,
    pub interests_suppressed: Counter,
    pub hop_limit_drops: Counter,
    pub no_route: Counter,

    // Reply path
    pub objects_received: Counter,
    pub objects_forwarded: Counter,
    pub objects_unsolicited: Counter,
    pub restriction_rejects: Counter,
    pub returns_received: Counter,
    pub returns_sent: Counter,

    // Cache metrics
    pub cs_hits: Counter,
    pub cs_misses: Counter,

    // PIT metrics
    pub pit_full: Counter,
    pub pit_expirations: Counter,
    pub pit_size: Gauge,

    // FIB metrics
    pub fib_size: Gauge,

    // Error handling
    pub validation_failures: Counter,
    pub malformed: Counter,
    pub framing_discards: Counter,
    pub commands: Counter,

    // Performance metrics
    pub processing_time_us: Histogram,

    // Transport metrics
    pub bytes_received: Counter,
}

impl ForwarderMetrics {
    pub fn new() -> Self {
        Self {
            interests_received: Counter::new(),
            interests_forwarded: Counter::new(),
            interests_aggregated: Counter::new(),
            interests_suppressed: Counter::new(),
            hop_limit_drops: Counter::new(),
            no_route: Counter::new(),
            objects_received: Counter::new(),
            objects_forwarded: Counter::new(),
            objects_unsolicited: Counter::new(),
            restriction_rejects: Counter::new(),
            returns_received: Counter::new(),
            returns_sent: Counter::new(),
            cs_hits: Counter::new(),
            cs_misses: Counter::new(),
            pit_full: Counter::new(),
            pit_expirations: Counter::new(),
            pit_size: Gauge::new(),
            fib_size: Gauge::new(),
            validation_failures: Counter::new(),
            malformed: Counter::new(),
            framing_discards: Counter::new(),
            commands: Counter::new(),
            processing_time_us: Histogram::exponential(1, 100_000, 12),
            bytes_received: Counter::new(),
        }
    }

    /// Point-in-time copy for the status command.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            interests_received: self.interests_received.value(),
            interests_forwarded: self.interests_forwarded.value(),
            interests_aggregated: self.interests_aggregated.value(),
            interests_suppressed: self.interests_suppressed.value(),
            hop_limit_drops: self.hop_limit_drops.value(),
            no_route: self.no_route.value(),
            objects_received: self.objects_received.value(),
            objects_forwarded: self.objects_forwarded.value(),
            objects_unsolicited: self.objects_unsolicited.value(),
            restriction_rejects: self.restriction_rejects.value(),
            returns_received: self.returns_received.value(),
            returns_sent: self.returns_sent.value(),
            cs_hits: self.cs_hits.value(),
            cs_misses: self.cs_misses.value(),
            pit_full: self.pit_full.value(),
            pit_expirations: self.pit_expirations.value(),
            pit_size: self.pit_size.value(),
            fib_size: self.fib_size.value(),
            validation_failures: self.validation_failures.value(),
            malformed: self.malformed.value(),
            framing_discards: self.framing_discards.value(),
            commands: self.commands.value(),
            avg_processing_time_us: self.processing_time_us.average(),
            bytes_received: self.bytes_received.value(),
        }
    }
}

impl Default for ForwarderMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable copy of [`ForwarderMetrics`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub interests_received: u64,
    pub interests_forwarded: u64,
    pub interests_aggregated: u64,
    pub interests_suppressed: u64,
    pub hop_limit_drops: u64,
    pub no_route: u64,
    pub objects_received: u64,
    pub objects_forwarded: u64,
    pub objects_unsolicited: u64,
    pub restriction_rejects: u64,
    pub returns_received: u64,
    pub returns_sent: u64,
    pub cs_hits: u64,
    pub cs_misses: u64,
    pub pit_full: u64,
    pub pit_expirations: u64,
    pub pit_size: u64,
    pub fib_size: u64,
    pub validation_failures: u64,
    pub malformed: u64,
    pub framing_discards: u64,
    pub commands: u64,
    pub avg_processing_time_us: f64,
    pub bytes_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_and_gauge() {
        let c = Counter::new();
        c.increment();
        c.add(4);
        assert_eq!(c.value(), 5);
        c.reset();
        assert_eq!(c.value(), 0);

        let g = Gauge::new();
        g.set(3);
        g.decrement();
        assert_eq!(g.value(), 2);
    }

    #[test]
    fn test_histogram_buckets() {
        let h = Histogram::new(vec![10, 100]);
        h.observe(5);
        h.observe(50);
        h.observe(500);
        assert_eq!(h.count(), 3);
        assert_eq!(h.sum(), 555);
        assert_eq!(h.counts(), vec![(10, 0), (100, 1)]);
        assert_eq!(h.overflow(), 1);
    }

    #[test]
    fn test_snapshot_reflects_counters() {
        let m = ForwarderMetrics::new();
        m.interests_received.add(3);
        m.pit_size.set(2);
        let snap = m.snapshot();
        assert_eq!(snap.interests_received, 3);
        assert_eq!(snap.pit_size, 2);
        assert_eq!(snap.no_route, 0);
    }
}
