//! A registered metric: identity, kind, and the live aggregator.
//!
//! The current aggregator is swapped wholesale at every cycle boundary;
//! retired aggregators rotate through a small spare pool so steady-state
//! cycles do not allocate.

use crate::core::{clock, AggregationConfig, KoosteError, Result};
use crate::metrics::aggregator::{AnyAggregator, MetricKind, Sample};
use crate::metrics::pool::ObjectPool;
use crate::metrics::registry::MetricCollectionManager;
use crate::metrics::tag::MetricIdentity;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// A named, tagged metric accepting samples.
pub struct Metric {
    identity: MetricIdentity,
    kind: MetricKind,
    config: AggregationConfig,
    current: ArcSwap<AnyAggregator>,
    spare_aggregators: ObjectPool<Arc<AnyAggregator>>,
    /// The manager this metric is registered with, if any. A metric can
    /// belong to at most one manager at a time.
    owner: Mutex<Option<Weak<MetricCollectionManager>>>,
}

impl Metric {
    /// Create a metric with default configuration. The initial
    /// aggregation period opens immediately so samples are accepted
    /// before the first cycle boundary.
    pub fn new(identity: MetricIdentity, kind: MetricKind) -> Self {
        Self::build(identity, kind, AggregationConfig::default())
    }

    /// Create a metric with explicit configuration.
    pub fn with_config(
        identity: MetricIdentity,
        kind: MetricKind,
        config: AggregationConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(identity, kind, config))
    }

    fn build(identity: MetricIdentity, kind: MetricKind, config: AggregationConfig) -> Self {
        let initial = Arc::new(kind.new_aggregator(&config));
        initial.start_period(clock::round_down_to_second(Utc::now()), clock::precise_ms());
        Self {
            identity,
            kind,
            current: ArcSwap::new(initial),
            spare_aggregators: ObjectPool::bounded(config.spare_aggregator_capacity),
            config,
            owner: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &MetricIdentity {
        &self.identity
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Record one sample against the current period. Returns false when
    /// the sample is rejected (a fractional value for a Count) or the
    /// period already finalized.
    #[inline]
    pub fn collect(&self, sample: impl Into<Sample>) -> bool {
        self.current.load().collect(sample.into())
    }

    /// Predictive check without touching any state.
    #[inline]
    pub fn can_collect(&self, sample: impl Into<Sample>) -> bool {
        self.current.load().can_collect(sample.into())
    }

    /// Swap in a fresh aggregator for the next period and return the
    /// outgoing one, still holding the finished period's samples.
    pub(crate) fn start_next_period(
        &self,
        start: DateTime<Utc>,
        tick: u32,
    ) -> Arc<AnyAggregator> {
        let fresh = self
            .spare_aggregators
            .try_pull()
            .unwrap_or_else(|| Arc::new(self.kind.new_aggregator(&self.config)));
        fresh.start_period(start, tick);
        self.current.swap(fresh)
    }

    /// Offer a finished aggregator back to the spare pool. Refuses
    /// aggregators that are still active; accepted ones are zeroed
    /// first so a later period starts clean.
    pub(crate) fn try_recycle_aggregator(&self, aggregator: Arc<AnyAggregator>) -> bool {
        if aggregator.is_active() {
            return false;
        }
        aggregator.reinitialize();
        self.spare_aggregators.try_add(aggregator)
    }

    /// Bind this metric to a manager. Fails when a different manager
    /// already owns it.
    pub(crate) fn attach_owner(&self, manager: &Weak<MetricCollectionManager>) -> Result<()> {
        let mut owner = self.owner.lock();
        match owner.as_ref() {
            Some(current) if Weak::ptr_eq(current, manager) => Ok(()),
            Some(current) if current.upgrade().is_some() => {
                Err(KoosteError::AlreadyOwned(self.identity.to_string()))
            }
            _ => {
                *owner = Some(manager.clone());
                Ok(())
            }
        }
    }

    /// Release the manager binding, if it points at `manager`.
    pub(crate) fn detach_owner(&self, manager: &Weak<MetricCollectionManager>) {
        let mut owner = self.owner.lock();
        if matches!(owner.as_ref(), Some(current) if Weak::ptr_eq(current, manager)) {
            *owner = None;
        }
    }

    /// The manager currently owning this metric, if it is still alive.
    pub fn manager(&self) -> Option<Arc<MetricCollectionManager>> {
        self.owner.lock().as_ref().and_then(Weak::upgrade)
    }

    #[cfg(test)]
    pub(crate) fn current_aggregator(&self) -> Arc<AnyAggregator> {
        self.current.load_full()
    }

    #[cfg(test)]
    pub(crate) fn spare_aggregator_count(&self) -> usize {
        self.spare_aggregators.len()
    }
}

impl std::fmt::Debug for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metric")
            .field("identity", &self.identity.canonical())
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::sink::AggregateData;

    fn metric(kind: MetricKind) -> Metric {
        Metric::new(MetricIdentity::plain("test.metric").unwrap(), kind)
    }

    #[test]
    fn test_collect_routes_to_current_aggregator() {
        let metric = metric(MetricKind::Count);
        assert!(metric.collect(2));
        assert!(metric.collect(3.0));
        assert!(!metric.collect(4.5));
        assert!(metric.collect(1));
    }

    #[test]
    fn test_can_collect_is_kind_specific() {
        let count = metric(MetricKind::Count);
        assert!(count.can_collect(3));
        assert!(!count.can_collect(3.5));

        let measurement = metric(MetricKind::Measurement);
        assert!(measurement.can_collect(3.5));
        assert!(measurement.can_collect(f64::NAN));
    }

    #[test]
    fn test_period_rotation_isolates_samples() {
        let metric = metric(MetricKind::Count);
        metric.collect(10);

        let tick = clock::precise_ms();
        let previous = metric.start_next_period(clock::round_down_to_second(Utc::now()), tick);
        let identity = metric.identity().clone();
        let aggregate = AnyAggregator::finish_period(&previous, &identity, Utc::now(), tick);
        assert_eq!(*aggregate.data(), AggregateData::Count { sum: 10 });

        // New period starts from zero.
        metric.collect(7);
        let next = metric.start_next_period(Utc::now(), clock::precise_ms());
        let aggregate =
            AnyAggregator::finish_period(&next, &identity, Utc::now(), clock::precise_ms());
        assert_eq!(*aggregate.data(), AggregateData::Count { sum: 7 });
    }

    #[test]
    fn test_recycle_refuses_active_aggregator() {
        let metric = metric(MetricKind::Count);
        let active = metric.current_aggregator();
        assert!(active.is_active());
        assert!(!metric.try_recycle_aggregator(active));
        assert_eq!(metric.spare_aggregator_count(), 0);
    }

    #[test]
    fn test_recycled_aggregator_is_reused_zeroed() {
        let metric = metric(MetricKind::Count);
        metric.collect(42);

        let previous = metric.start_next_period(Utc::now(), 0);
        let identity = metric.identity().clone();
        let _ = AnyAggregator::finish_period(&previous, &identity, Utc::now(), 0);
        assert!(metric.try_recycle_aggregator(previous));
        assert_eq!(metric.spare_aggregator_count(), 1);

        // The pooled aggregator comes back for the following period.
        let retired = metric.start_next_period(Utc::now(), 0);
        assert_eq!(metric.spare_aggregator_count(), 0);
        let aggregate =
            AnyAggregator::finish_period(&retired, &identity, Utc::now(), 0);
        assert_eq!(*aggregate.data(), AggregateData::Count { sum: 0 });
    }

    #[test]
    fn test_spare_pool_is_bounded() {
        let metric = metric(MetricKind::Count);
        let capacity = metric.config.spare_aggregator_capacity;
        for _ in 0..capacity + 2 {
            let previous = metric.start_next_period(Utc::now(), 0);
            let identity = metric.identity().clone();
            let _ = AnyAggregator::finish_period(&previous, &identity, Utc::now(), 0);
            metric.try_recycle_aggregator(previous);
        }
        assert_eq!(metric.spare_aggregator_count(), capacity);
    }
}
