//! Counter sink seam.
//!
//! The pipeline reports what it did through a [`MetricsSink`] collaborator
//! rather than a global recorder, so hosts decide where counts go and tests
//! can assert on them. Long-running read operations accumulate into an
//! [`OpContext`] first and flush once at the end, which keeps per-event
//! bookkeeping off the sink and makes the operation's totals inspectable.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

/// Counter and duration names used across the pipeline.
pub mod metric {
    pub const EVENTS_STORED: &str = "events_stored_total";
    pub const EVENTS_DISPATCHED: &str = "events_dispatched_total";
    pub const HANDLER_FAILURES: &str = "handler_failures_total";
    pub const MESSAGES_ROUTED: &str = "messages_routed_total";
    pub const MESSAGES_DEAD_LETTERED: &str = "messages_dead_lettered_total";
    pub const EVENTS_SCANNED: &str = "events_scanned_total";
    pub const EVENTS_REPLAYED: &str = "events_replayed_total";
    pub const INTEGRITY_VIOLATIONS: &str = "integrity_violations_total";

    pub const DISPATCH_DURATION: &str = "dispatch_duration";
}

/// Destination for pipeline counters and timings.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, metric: &'static str, by: u64);

    fn observe_duration(&self, _metric: &'static str, _duration: Duration) {}
}

impl<M> MetricsSink for Arc<M>
where
    M: MetricsSink + ?Sized,
{
    fn increment(&self, metric: &'static str, by: u64) {
        (**self).increment(metric, by);
    }

    fn observe_duration(&self, metric: &'static str, duration: Duration) {
        (**self).observe_duration(metric, duration);
    }
}

/// Discards every count. The default when a host wires nothing in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _metric: &'static str, _by: u64) {}
}

/// Accumulating sink for tests and small deployments.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counts: Mutex<BTreeMap<&'static str, u64>>,
    durations: Mutex<BTreeMap<&'static str, Vec<Duration>>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of one counter (0 when never incremented).
    pub fn value(&self, metric: &'static str) -> u64 {
        self.counts
            .lock()
            .unwrap()
            .get(metric)
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        self.counts.lock().unwrap().clone()
    }

    /// Number of duration samples observed for one metric.
    pub fn duration_samples(&self, metric: &'static str) -> usize {
        self.durations
            .lock()
            .unwrap()
            .get(metric)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment(&self, metric: &'static str, by: u64) {
        *self.counts.lock().unwrap().entry(metric).or_insert(0) += by;
    }

    fn observe_duration(&self, metric: &'static str, duration: Duration) {
        self.durations
            .lock()
            .unwrap()
            .entry(metric)
            .or_default()
            .push(duration);
    }
}

/// Per-operation tally for replay and reporting paths.
///
/// Each reconstruction call creates one, counts into it as it scans, and
/// flushes the totals to the sink when the operation completes. The context
/// is owned by the call, so concurrent operations never share counters.
#[derive(Debug)]
pub struct OpContext {
    operation: &'static str,
    started_at: Instant,
    counts: BTreeMap<&'static str, u64>,
}

impl OpContext {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            started_at: Instant::now(),
            counts: BTreeMap::new(),
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn add(&mut self, metric: &'static str, by: u64) {
        *self.counts.entry(metric).or_insert(0) += by;
    }

    /// Accumulated value of one counter within this operation.
    pub fn count(&self, metric: &'static str) -> u64 {
        self.counts.get(metric).copied().unwrap_or(0)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Push the accumulated totals and the operation's duration to the sink.
    pub fn flush(self, sink: &dyn MetricsSink) {
        let elapsed = self.elapsed();
        debug!(
            operation = self.operation,
            elapsed_ms = elapsed.as_millis() as u64,
            counters = self.counts.len(),
            "operation complete"
        );
        sink.observe_duration(self.operation, elapsed);
        for (metric, value) in self.counts {
            sink.increment(metric, value);
        }
    }
}
