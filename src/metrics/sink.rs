//! Finalized period aggregates and the submission seam.
//!
//! An [`Aggregate`] is an owned snapshot of one metric's period. The
//! sink takes ownership of whole blocks, serializes them however it
//! likes, and gives each aggregate back to its owning aggregator with
//! [`Aggregate::reinitialize_and_return_to_owner`] so the spare pools
//! stay warm.

use crate::metrics::aggregator::{AnyAggregator, MetricKind, PeriodWindow};
use crate::metrics::tag::MetricIdentity;
use crate::core::clock;
use chrono::{DateTime, Utc};
use std::sync::Weak;

/// Kind-specific aggregate payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateData {
    /// Total of all integer samples in the period.
    Count { sum: i64 },
    /// Summary statistics over the period's float samples. All values
    /// are finite: infinities are clamped and NaN maps to zero before
    /// the aggregate is published.
    Measurement {
        count: i32,
        sum: f64,
        min: f64,
        max: f64,
        std_dev: f64,
    },
}

impl AggregateData {
    /// The kind this payload belongs to.
    pub fn kind(&self) -> MetricKind {
        match self {
            AggregateData::Count { .. } => MetricKind::Count,
            AggregateData::Measurement { .. } => MetricKind::Measurement,
        }
    }

    fn zeroed(&self) -> Self {
        match self {
            AggregateData::Count { .. } => AggregateData::Count { sum: 0 },
            AggregateData::Measurement { .. } => AggregateData::Measurement {
                count: 0,
                sum: 0.0,
                min: 0.0,
                max: 0.0,
                std_dev: 0.0,
            },
        }
    }
}

/// One metric's finalized aggregate for one period.
#[derive(Debug)]
pub struct Aggregate {
    identity: MetricIdentity,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    period_start_precise_ms: u32,
    period_end_precise_ms: u32,
    data: AggregateData,
    owner: Weak<AnyAggregator>,
}

impl Aggregate {
    pub(crate) fn new(
        identity: MetricIdentity,
        window: &PeriodWindow,
        data: AggregateData,
        owner: Weak<AnyAggregator>,
    ) -> Self {
        Self {
            identity,
            period_start: window.start_timestamp(),
            period_end: window.end_timestamp(),
            period_start_precise_ms: window.start_precise_ms(),
            period_end_precise_ms: window.end_precise_ms(),
            data,
            owner,
        }
    }

    /// Refill a pooled aggregate in place.
    pub(crate) fn fill(
        &mut self,
        identity: MetricIdentity,
        window: &PeriodWindow,
        data: AggregateData,
        owner: Weak<AnyAggregator>,
    ) {
        self.identity = identity;
        self.period_start = window.start_timestamp();
        self.period_end = window.end_timestamp();
        self.period_start_precise_ms = window.start_precise_ms();
        self.period_end_precise_ms = window.end_precise_ms();
        self.data = data;
        self.owner = owner;
    }

    /// Identity of the metric this aggregate belongs to.
    pub fn identity(&self) -> &MetricIdentity {
        &self.identity
    }

    /// Rounded instant the period started.
    pub fn period_start(&self) -> DateTime<Utc> {
        self.period_start
    }

    /// Rounded instant the period ended.
    pub fn period_end(&self) -> DateTime<Utc> {
        self.period_end
    }

    /// Monotonic tick at period start, for duration arithmetic.
    pub fn period_start_precise_ms(&self) -> u32 {
        self.period_start_precise_ms
    }

    /// Monotonic tick at period end.
    pub fn period_end_precise_ms(&self) -> u32 {
        self.period_end_precise_ms
    }

    /// Exact period duration in milliseconds. Valid for periods shorter
    /// than ~24.9 days.
    pub fn finished_duration_ms(&self) -> u32 {
        clock::duration_ms(self.period_start_precise_ms, self.period_end_precise_ms)
    }

    /// The aggregated values.
    pub fn data(&self) -> &AggregateData {
        &self.data
    }

    /// The kind of metric this aggregate came from.
    pub fn kind(&self) -> MetricKind {
        self.data.kind()
    }

    /// Zero this aggregate and hand it back to the aggregator that
    /// produced it. The sink must call this exactly once per aggregate
    /// once it no longer needs the values. Returns false when the
    /// owning aggregator is gone or its spare pool is full, in which
    /// case the aggregate is simply dropped.
    pub fn reinitialize_and_return_to_owner(mut self) -> bool {
        self.data = self.data.zeroed();
        self.period_start = DateTime::<Utc>::UNIX_EPOCH;
        self.period_end = DateTime::<Utc>::UNIX_EPOCH;
        self.period_start_precise_ms = 0;
        self.period_end_precise_ms = 0;
        match self.owner.upgrade() {
            Some(owner) => owner.try_recycle_aggregate(self),
            None => false,
        }
    }
}

/// Receives finalized aggregates at each cycle boundary.
///
/// Aggregates for a single cycle may be delivered across multiple
/// blocks; implementations must not assume one call per period, and
/// must return every aggregate exactly once via
/// [`Aggregate::reinitialize_and_return_to_owner`].
pub trait SubmissionSink: Send + Sync {
    /// Take ownership of one block of aggregates.
    fn submit_metrics(&self, aggregates: Vec<Aggregate>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_kind() {
        assert_eq!(AggregateData::Count { sum: 3 }.kind(), MetricKind::Count);
        let m = AggregateData::Measurement {
            count: 1,
            sum: 2.0,
            min: 2.0,
            max: 2.0,
            std_dev: 0.0,
        };
        assert_eq!(m.kind(), MetricKind::Measurement);
    }

    #[test]
    fn test_zeroed_preserves_variant() {
        let z = AggregateData::Count { sum: 99 }.zeroed();
        assert_eq!(z, AggregateData::Count { sum: 0 });

        let m = AggregateData::Measurement {
            count: 5,
            sum: 1.0,
            min: -1.0,
            max: 2.0,
            std_dev: 0.5,
        }
        .zeroed();
        assert_eq!(
            m,
            AggregateData::Measurement {
                count: 0,
                sum: 0.0,
                min: 0.0,
                max: 0.0,
                std_dev: 0.0,
            }
        );
    }

    #[test]
    fn test_return_without_owner_drops() {
        let identity = MetricIdentity::plain("orphan").unwrap();
        let window = PeriodWindow::new();
        let aggregate = Aggregate::new(
            identity,
            &window,
            AggregateData::Count { sum: 1 },
            Weak::new(),
        );
        assert!(!aggregate.reinitialize_and_return_to_owner());
    }
}
