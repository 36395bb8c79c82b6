//! Metric registry, aggregators and the lock-free collection path.
//!
//! Layered bottom-up:
//! - `pool`, `values_buffer`, `latch`: concurrency primitives
//! - `aggregator`, `buffered`, `count`, `measurement`: per-kind state
//! - `metric`, `registry`, `sink`: the registered surface and the
//!   cycle boundary

pub mod aggregator;
pub(crate) mod buffered;
pub mod count;
pub mod latch;
pub mod measurement;
pub mod metric;
pub mod pool;
pub mod registry;
pub mod sink;
pub mod tag;
pub mod values_buffer;

pub use aggregator::{AnyAggregator, MetricKind, PeriodWindow, Sample};
pub use metric::Metric;
pub use pool::ObjectPool;
pub use registry::{MetricCollectionManager, MetricsSet};
pub use sink::{Aggregate, AggregateData, SubmissionSink};
pub use tag::{MetricIdentity, MetricTag};
pub use values_buffer::ValuesBuffer;
