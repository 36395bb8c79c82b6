//! Metric registry with copy-on-write snapshots and the per-cycle
//! swap-and-submit step.
//!
//! Registration and removal are orders of magnitude rarer than lookups,
//! so the registry publishes immutable snapshots behind an atomic
//! pointer: a lookup is one pointer load, and every mutation builds a
//! new snapshot and installs it by compare-and-swap.

use crate::core::{AggregationConfig, Result};
use crate::metrics::aggregator::{AnyAggregator, MetricKind};
use crate::metrics::metric::Metric;
use crate::metrics::sink::{Aggregate, SubmissionSink};
use crate::metrics::tag::{MetricIdentity, MetricTag};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Immutable snapshot of the registered metrics. The ordered list and
/// the identity index share the same `Arc<Metric>` entries.
#[derive(Debug, Default)]
pub struct MetricsSet {
    ordered: Vec<Arc<Metric>>,
    index: HashMap<MetricIdentity, Arc<Metric>>,
}

impl MetricsSet {
    fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn get(&self, identity: &MetricIdentity) -> Option<&Arc<Metric>> {
        self.index.get(identity)
    }

    pub fn contains(&self, identity: &MetricIdentity) -> bool {
        self.index.contains_key(identity)
    }

    /// Metrics in registration order.
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Metric>> {
        self.ordered.iter()
    }

    /// All metrics sharing `name`, regardless of tags. Names are not
    /// unique, so this is a linear scan over the snapshot.
    pub fn named(&self, name: &str) -> Vec<Arc<Metric>> {
        self.ordered
            .iter()
            .filter(|metric| metric.identity().name() == name)
            .cloned()
            .collect()
    }

    fn with_added(&self, metric: Arc<Metric>) -> Self {
        let mut ordered = self.ordered.clone();
        let mut index = self.index.clone();
        index.insert(metric.identity().clone(), Arc::clone(&metric));
        ordered.push(metric);
        Self { ordered, index }
    }

    fn with_removed(&self, identity: &MetricIdentity) -> Option<(Self, Arc<Metric>)> {
        let removed = self.index.get(identity)?.clone();
        let ordered = self
            .ordered
            .iter()
            .filter(|metric| metric.identity() != identity)
            .cloned()
            .collect();
        let mut index = self.index.clone();
        index.remove(identity);
        Some((Self { ordered, index }, removed))
    }
}

impl<'a> IntoIterator for &'a MetricsSet {
    type Item = &'a Arc<Metric>;
    type IntoIter = std::slice::Iter<'a, Arc<Metric>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Owns the live metric set and orchestrates the cycle boundary.
pub struct MetricCollectionManager {
    config: AggregationConfig,
    metrics: ArcSwap<MetricsSet>,
    sink: RwLock<Option<Arc<dyn SubmissionSink>>>,
    weak_self: Weak<MetricCollectionManager>,
}

impl MetricCollectionManager {
    /// Create a manager with the given configuration.
    pub fn new(config: AggregationConfig) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new_cyclic(|weak_self| Self {
            config,
            metrics: ArcSwap::from_pointee(MetricsSet::empty()),
            sink: RwLock::new(None),
            weak_self: weak_self.clone(),
        }))
    }

    /// Create a manager with default configuration.
    pub fn with_defaults() -> Arc<Self> {
        Self::new(AggregationConfig::default()).unwrap_or_else(|_| {
            unreachable!("default aggregation config must be valid")
        })
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Register `metric`, or return the already-registered metric with
    /// the same identity. Fails when the metric is owned by a different
    /// manager.
    pub fn get_or_add_metric(&self, metric: Arc<Metric>) -> Result<Arc<Metric>> {
        loop {
            let snapshot = self.metrics.load();
            if let Some(existing) = snapshot.get(metric.identity()) {
                return Ok(Arc::clone(existing));
            }

            metric.attach_owner(&self.weak_self)?;
            let next = Arc::new(snapshot.with_added(Arc::clone(&metric)));
            let previous = self.metrics.compare_and_swap(&snapshot, next);
            if Arc::ptr_eq(&*previous, &*snapshot) {
                tracing::debug!(metric = %metric.identity(), "metric registered");
                return Ok(metric);
            }
            // Lost the publication race; undo the binding and retry
            // against the winner's snapshot.
            metric.detach_owner(&self.weak_self);
        }
    }

    /// Build and register a metric in one step, reusing an existing
    /// registration when the identity is already known.
    pub fn get_or_create_metric(
        &self,
        name: &str,
        kind: MetricKind,
        tags: Vec<MetricTag>,
    ) -> Result<Arc<Metric>> {
        let identity = MetricIdentity::new(name, tags)?;
        if let Some(existing) = self.try_get_metric(&identity) {
            return Ok(existing);
        }
        let metric = Metric::with_config(identity, kind, self.config.clone())?;
        self.get_or_add_metric(Arc::new(metric))
    }

    /// Look up a metric by identity.
    pub fn try_get_metric(&self, identity: &MetricIdentity) -> Option<Arc<Metric>> {
        self.metrics.load().get(identity).cloned()
    }

    /// The current snapshot. Holders keep enumerating the contents as
    /// of this call even across later mutations.
    pub fn metrics(&self) -> Arc<MetricsSet> {
        self.metrics.load_full()
    }

    /// All metrics sharing `name`.
    pub fn metrics_named(&self, name: &str) -> Vec<Arc<Metric>> {
        self.metrics.load().named(name)
    }

    /// Unregister the metric with `identity`. Returns false when it was
    /// not registered.
    pub fn try_remove_metric(&self, identity: &MetricIdentity) -> bool {
        loop {
            let snapshot = self.metrics.load();
            let Some((next, removed)) = snapshot.with_removed(identity) else {
                return false;
            };
            let next = Arc::new(next);
            let previous = self.metrics.compare_and_swap(&snapshot, next);
            if Arc::ptr_eq(&*previous, &*snapshot) {
                removed.detach_owner(&self.weak_self);
                tracing::debug!(metric = %identity, "metric removed");
                return true;
            }
        }
    }

    /// Install or clear the submission sink.
    pub fn set_submission_sink(&self, sink: Option<Arc<dyn SubmissionSink>>) {
        *self.sink.write() = sink;
    }

    /// Run one cycle boundary: rotate every metric's aggregator,
    /// finalize the outgoing period, and hand the aggregates to the
    /// sink in blocks.
    pub fn run_collection_cycle(&self, cycle_start: DateTime<Utc>) {
        let snapshot = self.metrics.load_full();
        if snapshot.is_empty() {
            return;
        }

        let block_size = self.config.submission_block_size;
        let tick = crate::core::clock::precise_ms();

        // Rotation first, and nothing else in the loop: every metric's
        // boundary lands within the narrowest possible tick spread.
        let mut rotated: Vec<Vec<(Arc<Metric>, Arc<AnyAggregator>)>> =
            Vec::with_capacity(snapshot.len() / block_size + 1);
        let mut block = Vec::with_capacity(block_size.min(snapshot.len()));
        for metric in &*snapshot {
            let previous = metric.start_next_period(cycle_start, tick);
            block.push((Arc::clone(metric), previous));
            if block.len() == block_size {
                rotated.push(std::mem::take(&mut block));
            }
        }
        if !block.is_empty() {
            rotated.push(block);
        }

        // Finalize the outgoing aggregators block by block.
        let mut aggregate_blocks: Vec<Vec<Aggregate>> = Vec::with_capacity(rotated.len());
        for block in &rotated {
            let mut aggregates = Vec::with_capacity(block.len());
            for (metric, previous) in block {
                aggregates.push(AnyAggregator::finish_period(
                    previous,
                    metric.identity(),
                    cycle_start,
                    tick,
                ));
            }
            aggregate_blocks.push(aggregates);
        }

        // Retire the aggregators before submission so their memory is
        // reusable while the sink works.
        for block in rotated.drain(..) {
            for (metric, previous) in block {
                metric.try_recycle_aggregator(previous);
            }
        }

        tracing::debug!(
            metrics = snapshot.len(),
            blocks = aggregate_blocks.len(),
            cycle_start = %cycle_start,
            "collection cycle finalized"
        );

        let sink = self.sink.read().clone();
        match sink {
            Some(sink) => {
                for aggregates in aggregate_blocks {
                    sink.submit_metrics(aggregates);
                }
            }
            None => {
                // No sink installed: recycle directly so the spare
                // pools stay warm.
                for aggregates in aggregate_blocks {
                    for aggregate in aggregates {
                        aggregate.reinitialize_and_return_to_owner();
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for MetricCollectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricCollectionManager")
            .field("metrics", &self.metrics.load().len())
            .field("has_sink", &self.sink.read().is_some())
            .finish()
    }
}
