//! Kooste - in-process metrics aggregation.
//!
//! Application code registers named metrics, records numeric samples on
//! hot paths, and kooste periodically rolls the samples up into
//! per-period aggregates handed to a pluggable submission sink.
//!
//! # Features
//!
//! - **Lock-free collection**: one atomic increment per sample on the
//!   hot path; no locks, no allocation
//! - **Periodic rollup**: a dedicated cycle thread swaps every metric's
//!   accumulator at slot-aligned period boundaries
//! - **Object pooling**: aggregators, aggregates and value buffers are
//!   recycled between periods
//! - **Two aggregation kinds**: integer counts and full measurement
//!   statistics (count/sum/min/max/stddev)
//!
//! # Architecture
//!
//! - `core`: errors, configuration, clocks
//! - `metrics`: registry, aggregators, the lock-free collection path
//! - `cycle`: the period boundary driver
//!
//! # Example
//!
//! ```no_run
//! use kooste::{AggregationCycleDriver, MetricCollectionManager, MetricKind};
//!
//! fn main() -> kooste::Result<()> {
//!     let manager = MetricCollectionManager::with_defaults();
//!     let latency = manager.get_or_create_metric(
//!         "api.latency",
//!         MetricKind::Measurement,
//!         vec![],
//!     )?;
//!
//!     let driver = AggregationCycleDriver::for_manager(manager)?;
//!     driver.start()?;
//!
//!     latency.collect(12.5);
//!
//!     driver.shutdown();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod core;
pub mod cycle;
pub mod metrics;

pub use crate::core::{AggregationConfig, KoosteError, Result};
pub use crate::cycle::{AggregationCycleDriver, DriverState};
pub use crate::metrics::{
    Aggregate, AggregateData, Metric, MetricCollectionManager, MetricIdentity, MetricKind,
    MetricTag, Sample, SubmissionSink,
};
