//! Measurement aggregation: count, sum, min, max and population
//! standard deviation over float samples.
//!
//! Samples land in the lock-free values buffer; folds into the running
//! totals happen per full buffer under a short lock, not per sample.
//! NaN samples are excluded from every statistic. Non-finite totals are
//! projected onto finite values when the aggregate is published.

use crate::core::AggregationConfig;
use crate::metrics::aggregator::{AnyAggregator, PeriodWindow, Sample};
use crate::metrics::buffered::BufferedIntake;
use crate::metrics::pool::ObjectPool;
use crate::metrics::sink::{Aggregate, AggregateData};
use crate::metrics::tag::MetricIdentity;
use crate::metrics::values_buffer::ValuesBuffer;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Weak;

/// Replace NaN with zero and clamp infinities into the finite range.
#[inline]
fn ensure_concrete(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(f64::MIN, f64::MAX)
    }
}

/// Running totals for one period.
#[derive(Debug)]
struct RunningMeasurement {
    count: i32,
    sum: f64,
    min: f64,
    max: f64,
    sum_of_squares: f64,
    std_dev: f64,
}

impl RunningMeasurement {
    fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::MAX,
            max: f64::MIN,
            sum_of_squares: 0.0,
            std_dev: 0.0,
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    /// Population standard deviation of the samples folded so far. NaN
    /// while a total is infinite; the concrete-value projection maps
    /// that to zero at publication.
    fn recompute_std_dev(&mut self) {
        self.std_dev = if self.count == 0 {
            0.0
        } else if self.sum.is_infinite() || self.sum_of_squares.is_infinite() {
            f64::NAN
        } else {
            let mean = self.sum / f64::from(self.count);
            let variance = self.sum_of_squares / f64::from(self.count) - mean * mean;
            variance.max(0.0).sqrt()
        };
    }
}

/// Aggregator for the Measurement kind.
pub struct MeasurementAggregator {
    window: PeriodWindow,
    intake: BufferedIntake,
    running: Mutex<RunningMeasurement>,
    spare_aggregates: ObjectPool<Aggregate>,
}

impl MeasurementAggregator {
    pub(crate) fn new(config: &AggregationConfig) -> Self {
        Self {
            window: PeriodWindow::new(),
            intake: BufferedIntake::new(config),
            running: Mutex::new(RunningMeasurement::new()),
            spare_aggregates: ObjectPool::bounded(config.spare_aggregate_capacity),
        }
    }

    pub(crate) fn window(&self) -> &PeriodWindow {
        &self.window
    }

    /// Measurements accept every sample, NaN included.
    pub fn can_collect(&self, _sample: Sample) -> bool {
        true
    }

    pub fn collect(&self, sample: Sample) -> bool {
        let value = sample.as_f64();
        self.intake
            .collect(&self.window, value, |buffer, count| {
                self.fold_buffer(buffer, count)
            })
    }

    /// Fold one counted-and-locked buffer into the running totals.
    fn fold_buffer(&self, buffer: &ValuesBuffer, count: usize) {
        // First pass without any lock: local accumulation over the
        // buffer. Min and max are seeded from slot 0 even when it is
        // NaN; the NaN-insensitive comparisons in the merge below keep
        // a NaN seed from ever overriding real bounds.
        let first = buffer.get(0);
        let mut buf_count = 0i32;
        let mut buf_sum = 0.0f64;
        let mut buf_sum_sq = 0.0f64;
        let mut buf_min = first;
        let mut buf_max = first;
        for i in 0..count {
            let v = buffer.get(i);
            if v.is_nan() {
                continue;
            }
            buf_count += 1;
            buf_sum += v;
            buf_sum_sq += v * v;
            if v < buf_min {
                buf_min = v;
            }
            if v > buf_max {
                buf_max = v;
            }
        }

        let mut running = self.running.lock();
        running.count += buf_count;
        running.sum += buf_sum;
        running.sum_of_squares += buf_sum_sq;
        if buf_min < running.min {
            running.min = buf_min;
        }
        if buf_max > running.max {
            running.max = buf_max;
        }
        running.recompute_std_dev();
    }

    pub(crate) fn finish_period(
        &self,
        identity: &MetricIdentity,
        owner: Weak<AnyAggregator>,
        end: DateTime<Utc>,
        tick: u32,
    ) -> Aggregate {
        self.window.finish(end, tick);
        self.intake
            .drain(|buffer, count| self.fold_buffer(buffer, count));

        let mut running = self.running.lock();
        running.sum = ensure_concrete(running.sum);
        running.min = ensure_concrete(running.min);
        running.max = ensure_concrete(running.max);
        running.sum_of_squares = ensure_concrete(running.sum_of_squares);
        running.std_dev = ensure_concrete(running.std_dev);
        let data = AggregateData::Measurement {
            count: running.count,
            sum: running.sum,
            min: running.min,
            max: running.max,
            std_dev: running.std_dev,
        };
        drop(running);

        match self.spare_aggregates.try_pull() {
            Some(mut pooled) => {
                pooled.fill(identity.clone(), &self.window, data, owner);
                pooled
            }
            None => Aggregate::new(identity.clone(), &self.window, data, owner),
        }
    }

    pub(crate) fn reinitialize(&self) {
        self.running.lock().reset();
        self.intake.reset_current();
        self.window.clear();
    }

    pub(crate) fn try_recycle_aggregate(&self, aggregate: Aggregate) -> bool {
        debug_assert!(matches!(
            aggregate.data(),
            AggregateData::Measurement { count: 0, .. }
        ));
        self.spare_aggregates.try_add(aggregate)
    }
}

impl std::fmt::Debug for MeasurementAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let running = self.running.lock();
        f.debug_struct("MeasurementAggregator")
            .field("count", &running.count)
            .field("sum", &running.sum)
            .field("active", &self.window.is_active())
            .finish()
    }
}
