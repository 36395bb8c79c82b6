//! Aggregator surface shared by every metric kind.
//!
//! Each metric owns one active aggregator per period. The aggregator
//! accepts samples between `start_period` and `finish_period`, then
//! freezes its running state into an [`Aggregate`] that is handed to the
//! submission sink. The closed kind set is a tagged sum; dispatch is a
//! plain match.

use crate::core::{clock, AggregationConfig};
use crate::metrics::count::CountAggregator;
use crate::metrics::measurement::MeasurementAggregator;
use crate::metrics::sink::Aggregate;
use crate::metrics::tag::MetricIdentity;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

/// A numeric sample on its way into an aggregator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    /// An exact integer sample.
    Integer(i64),
    /// A floating-point sample.
    Real(f64),
}

impl Sample {
    /// The sample as a float, exact for integers up to 2^53.
    #[inline]
    pub fn as_f64(self) -> f64 {
        match self {
            Sample::Integer(v) => v as f64,
            Sample::Real(v) => v,
        }
    }
}

impl From<i64> for Sample {
    fn from(v: i64) -> Self {
        Sample::Integer(v)
    }
}

impl From<i32> for Sample {
    fn from(v: i32) -> Self {
        Sample::Integer(v.into())
    }
}

impl From<f64> for Sample {
    fn from(v: f64) -> Self {
        Sample::Real(v)
    }
}

impl From<f32> for Sample {
    fn from(v: f32) -> Self {
        Sample::Real(v.into())
    }
}

/// The closed set of aggregation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Integer event counting; one atomic add per sample.
    Count,
    /// Count/sum/min/max/standard-deviation over float samples.
    Measurement,
}

impl MetricKind {
    /// Build a fresh aggregator of this kind.
    pub(crate) fn new_aggregator(self, config: &AggregationConfig) -> AnyAggregator {
        match self {
            MetricKind::Count => AnyAggregator::Count(CountAggregator::new(config)),
            MetricKind::Measurement => {
                AnyAggregator::Measurement(MeasurementAggregator::new(config))
            }
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Count => f.write_str("count"),
            MetricKind::Measurement => f.write_str("measurement"),
        }
    }
}

/// One aggregation period's timing state.
///
/// Start and finish are only ever written by the cycle thread; producers
/// read `active` on every sample.
#[derive(Debug)]
pub struct PeriodWindow {
    start_ms: AtomicI64,
    end_ms: AtomicI64,
    start_tick: AtomicU32,
    end_tick: AtomicU32,
    active: AtomicBool,
}

impl PeriodWindow {
    pub fn new() -> Self {
        Self {
            start_ms: AtomicI64::new(0),
            end_ms: AtomicI64::new(0),
            start_tick: AtomicU32::new(0),
            end_tick: AtomicU32::new(0),
            active: AtomicBool::new(false),
        }
    }

    /// Open the window: record the rounded start instant and precise
    /// tick, then mark the aggregator active.
    pub fn start(&self, start: DateTime<Utc>, tick: u32) {
        self.start_ms.store(start.timestamp_millis(), Ordering::Release);
        self.end_ms.store(0, Ordering::Release);
        self.start_tick.store(tick, Ordering::Release);
        self.end_tick.store(tick, Ordering::Release);
        self.active.store(true, Ordering::Release);
    }

    /// Close the window: record the end instant and tick, then mark the
    /// aggregator inactive. Ordered so that a producer observing
    /// `active == false` will never race a half-written end timestamp.
    pub fn finish(&self, end: DateTime<Utc>, tick: u32) {
        self.end_ms.store(end.timestamp_millis(), Ordering::Release);
        self.end_tick.store(tick, Ordering::Release);
        self.active.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn start_timestamp(&self) -> DateTime<Utc> {
        clock::timestamp_from_ms(self.start_ms.load(Ordering::Acquire))
    }

    pub fn end_timestamp(&self) -> DateTime<Utc> {
        clock::timestamp_from_ms(self.end_ms.load(Ordering::Acquire))
    }

    pub fn start_precise_ms(&self) -> u32 {
        self.start_tick.load(Ordering::Acquire)
    }

    pub fn end_precise_ms(&self) -> u32 {
        self.end_tick.load(Ordering::Acquire)
    }

    /// Exact period duration from the wrapping tick counter. Valid for
    /// periods shorter than ~24.9 days.
    pub fn finished_duration_ms(&self) -> u32 {
        clock::duration_ms(self.start_precise_ms(), self.end_precise_ms())
    }

    /// Zero everything for pool reuse.
    pub(crate) fn clear(&self) {
        self.active.store(false, Ordering::Release);
        self.start_ms.store(0, Ordering::Release);
        self.end_ms.store(0, Ordering::Release);
        self.start_tick.store(0, Ordering::Release);
        self.end_tick.store(0, Ordering::Release);
    }
}

impl Default for PeriodWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// A concrete aggregator of either kind.
#[derive(Debug)]
pub enum AnyAggregator {
    /// Running state for a Count metric.
    Count(CountAggregator),
    /// Running state for a Measurement metric.
    Measurement(MeasurementAggregator),
}

impl AnyAggregator {
    pub fn kind(&self) -> MetricKind {
        match self {
            AnyAggregator::Count(_) => MetricKind::Count,
            AnyAggregator::Measurement(_) => MetricKind::Measurement,
        }
    }

    pub fn window(&self) -> &PeriodWindow {
        match self {
            AnyAggregator::Count(a) => a.window(),
            AnyAggregator::Measurement(a) => a.window(),
        }
    }

    /// True while the current period accepts samples.
    pub fn is_active(&self) -> bool {
        self.window().is_active()
    }

    /// Predictive check: would a sample of this shape be accepted?
    pub fn can_collect(&self, sample: Sample) -> bool {
        match self {
            AnyAggregator::Count(a) => a.can_collect(sample),
            AnyAggregator::Measurement(a) => a.can_collect(sample),
        }
    }

    /// Record one sample. Returns false when the sample is rejected or
    /// the period already finalized.
    pub fn collect(&self, sample: Sample) -> bool {
        match self {
            AnyAggregator::Count(a) => a.collect(sample),
            AnyAggregator::Measurement(a) => a.collect(sample),
        }
    }

    /// Open a new aggregation period.
    pub fn start_period(&self, start: DateTime<Utc>, tick: u32) {
        self.window().start(start, tick);
    }

    /// Close the period and freeze its running state into an aggregate.
    /// The aggregate keeps a weak handle to `this` so the sink can
    /// recycle it after submission.
    pub fn finish_period(
        this: &Arc<Self>,
        identity: &MetricIdentity,
        end: DateTime<Utc>,
        tick: u32,
    ) -> Aggregate {
        let owner = Arc::downgrade(this);
        match &**this {
            AnyAggregator::Count(a) => a.finish_period(identity, owner, end, tick),
            AnyAggregator::Measurement(a) => a.finish_period(identity, owner, end, tick),
        }
    }

    /// Zero the running state for pool reuse. Must only be called on an
    /// inactive aggregator.
    pub(crate) fn reinitialize(&self) {
        match self {
            AnyAggregator::Count(a) => a.reinitialize(),
            AnyAggregator::Measurement(a) => a.reinitialize(),
        }
    }

    /// Accept a zeroed aggregate back into this aggregator's spare pool.
    pub(crate) fn try_recycle_aggregate(&self, aggregate: Aggregate) -> bool {
        match self {
            AnyAggregator::Count(a) => a.try_recycle_aggregate(aggregate),
            AnyAggregator::Measurement(a) => a.try_recycle_aggregate(aggregate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sample_conversions() {
        assert_eq!(Sample::from(3i64), Sample::Integer(3));
        assert_eq!(Sample::from(3i32), Sample::Integer(3));
        assert_eq!(Sample::from(1.5f64), Sample::Real(1.5));
        assert_eq!(Sample::Integer(4).as_f64(), 4.0);
    }

    #[test]
    fn test_window_lifecycle() {
        let window = PeriodWindow::new();
        assert!(!window.is_active());

        let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        window.start(start, 1_000);
        assert!(window.is_active());
        assert_eq!(window.start_timestamp(), start);
        assert_eq!(window.start_precise_ms(), 1_000);

        let end = start + chrono::Duration::seconds(10);
        window.finish(end, 11_000);
        assert!(!window.is_active());
        assert_eq!(window.end_timestamp(), end);
        assert_eq!(window.finished_duration_ms(), 10_000);
    }

    #[test]
    fn test_window_duration_wraps() {
        let window = PeriodWindow::new();
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        window.start(ts, u32::MAX - 500);
        window.finish(ts + chrono::Duration::seconds(1), 500);
        assert_eq!(window.finished_duration_ms(), 1_001);
    }

    #[test]
    fn test_window_clear() {
        let window = PeriodWindow::new();
        window.start(Utc::now(), 42);
        window.clear();
        assert!(!window.is_active());
        assert_eq!(window.start_precise_ms(), 0);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(MetricKind::Count.to_string(), "count");
        assert_eq!(MetricKind::Measurement.to_string(), "measurement");
    }
}
