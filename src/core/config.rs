//! Configuration for the aggregation pipeline.
//!
//! All knobs have production defaults; `validate()` is called at every
//! API boundary that accepts a config, so invalid values surface before
//! any thread is spawned or pool allocated.

use crate::core::{KoosteError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest allowed values-buffer capacity.
pub const MAX_VALUES_BUFFER_CAPACITY: usize = 5_000;
/// Largest allowed spare-pool capacity.
pub const MAX_POOL_CAPACITY: usize = 10_000;
/// Longest allowed aggregation period.
pub const MAX_PERIOD_SECONDS: u64 = 86_400;

/// Sub-minute period lengths the cycle grid supports.
const SUB_MINUTE_PERIODS: [u64; 5] = [5, 10, 15, 20, 30];

/// Complete configuration for a metric collection manager and its
/// cycle driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Length of one aggregation period. Must be 5, 10, 15, 20 or 30
    /// seconds, or a whole multiple of one minute up to one day.
    #[serde(with = "humantime_serde")]
    pub period_length: Duration,
    /// Gate every collect through the reader side of the period latch.
    /// Closes the boundary race where a producer believes it recorded a
    /// sample after the period already finalized, at the cost of one
    /// extra increment/decrement per sample.
    pub collect_synchronized: bool,
    /// Capacity of each values buffer used by buffered aggregators.
    pub values_buffer_capacity: usize,
    /// Spare values buffers retained per aggregator.
    pub spare_buffer_capacity: usize,
    /// Spare aggregators retained per metric.
    pub spare_aggregator_capacity: usize,
    /// Spare aggregates retained per aggregator.
    pub spare_aggregate_capacity: usize,
    /// Aggregates handed to the submission sink per block.
    pub submission_block_size: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            period_length: Duration::from_secs(10),
            collect_synchronized: false,
            values_buffer_capacity: 500,
            spare_buffer_capacity: 3,
            spare_aggregator_capacity: 3,
            spare_aggregate_capacity: 3,
            submission_block_size: 2_000,
        }
    }
}

impl AggregationConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let secs = self.period_length.as_secs();
        let whole = self.period_length.subsec_nanos() == 0;
        let valid_period = whole
            && if secs < 60 {
                SUB_MINUTE_PERIODS.contains(&secs)
            } else {
                secs % 60 == 0 && secs <= MAX_PERIOD_SECONDS
            };
        if !valid_period {
            return Err(KoosteError::InvalidPeriod(secs));
        }

        if self.values_buffer_capacity == 0
            || self.values_buffer_capacity > MAX_VALUES_BUFFER_CAPACITY
        {
            return Err(KoosteError::BufferCapacity {
                requested: self.values_buffer_capacity,
                max: MAX_VALUES_BUFFER_CAPACITY,
            });
        }

        for capacity in [
            self.spare_buffer_capacity,
            self.spare_aggregator_capacity,
            self.spare_aggregate_capacity,
        ] {
            if capacity == 0 || capacity > MAX_POOL_CAPACITY {
                return Err(KoosteError::PoolCapacity {
                    requested: capacity,
                    max: MAX_POOL_CAPACITY,
                });
            }
        }

        if self.submission_block_size == 0 {
            return Err(KoosteError::config(
                "submission_block_size must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Period length in whole seconds.
    pub fn period_seconds(&self) -> u64 {
        self.period_length.as_secs()
    }
}
