//! Count aggregation: one atomic add per sample.
//!
//! No values buffer is involved; the per-sample cost is already a
//! single fetch-add. Float samples are accepted only when exactly
//! integral, so a count can never pick up a fractional component.

use crate::core::AggregationConfig;
use crate::metrics::aggregator::{AnyAggregator, PeriodWindow, Sample};
use crate::metrics::pool::ObjectPool;
use crate::metrics::sink::{Aggregate, AggregateData};
use crate::metrics::tag::MetricIdentity;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Weak;

/// Running state for the Count kind.
pub struct CountAggregator {
    window: PeriodWindow,
    sum: AtomicI64,
    spare_aggregates: ObjectPool<Aggregate>,
}

/// True when `v` can be represented as an `i64` without loss.
#[inline]
fn integral(v: f64) -> bool {
    v.is_finite() && (v as i64) as f64 == v
}

impl CountAggregator {
    pub(crate) fn new(config: &AggregationConfig) -> Self {
        Self {
            window: PeriodWindow::new(),
            sum: AtomicI64::new(0),
            spare_aggregates: ObjectPool::bounded(config.spare_aggregate_capacity),
        }
    }

    pub(crate) fn window(&self) -> &PeriodWindow {
        &self.window
    }

    /// Counts accept integers and integral floats only.
    pub fn can_collect(&self, sample: Sample) -> bool {
        match sample {
            Sample::Integer(_) => true,
            Sample::Real(v) => integral(v),
        }
    }

    pub fn collect(&self, sample: Sample) -> bool {
        if !self.window.is_active() {
            return false;
        }
        let delta = match sample {
            Sample::Integer(v) => v,
            Sample::Real(v) if integral(v) => v as i64,
            Sample::Real(_) => return false,
        };
        self.sum.fetch_add(delta, Ordering::AcqRel);
        true
    }

    pub(crate) fn finish_period(
        &self,
        identity: &MetricIdentity,
        owner: Weak<AnyAggregator>,
        end: DateTime<Utc>,
        tick: u32,
    ) -> Aggregate {
        self.window.finish(end, tick);
        let data = AggregateData::Count {
            sum: self.sum.load(Ordering::SeqCst),
        };
        match self.spare_aggregates.try_pull() {
            Some(mut pooled) => {
                pooled.fill(identity.clone(), &self.window, data, owner);
                pooled
            }
            None => Aggregate::new(identity.clone(), &self.window, data, owner),
        }
    }

    pub(crate) fn reinitialize(&self) {
        self.sum.store(0, Ordering::SeqCst);
        self.window.clear();
    }

    pub(crate) fn try_recycle_aggregate(&self, aggregate: Aggregate) -> bool {
        debug_assert!(matches!(aggregate.data(), AggregateData::Count { sum: 0 }));
        self.spare_aggregates.try_add(aggregate)
    }

    #[cfg(test)]
    pub(crate) fn running_sum(&self) -> i64 {
        self.sum.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CountAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountAggregator")
            .field("sum", &self.sum.load(Ordering::Relaxed))
            .field("active", &self.window.is_active())
            .finish()
    }
}
