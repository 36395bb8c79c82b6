//! Bounded lock-free object pool.
//!
//! Recycles aggregators, aggregates and values buffers between periods
//! so the steady-state collection path never allocates. Both operations
//! may fail spuriously under contention; the caller's fallback is a
//! plain allocation (on pull) or dropping the instance (on add).

use crate::core::config::MAX_POOL_CAPACITY;
use crate::core::{KoosteError, Result};
use crossbeam::queue::ArrayQueue;

/// Fixed-capacity pool of recyclable instances.
pub struct ObjectPool<T> {
    items: ArrayQueue<T>,
}

impl<T> ObjectPool<T> {
    /// Create a pool holding at most `capacity` instances.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > MAX_POOL_CAPACITY {
            return Err(KoosteError::PoolCapacity {
                requested: capacity,
                max: MAX_POOL_CAPACITY,
            });
        }
        Ok(Self {
            items: ArrayQueue::new(capacity),
        })
    }

    /// Internal constructor for capacities that were already validated
    /// through [`AggregationConfig::validate`]; clamps instead of
    /// failing so pool construction stays infallible on the cycle path.
    ///
    /// [`AggregationConfig::validate`]: crate::core::AggregationConfig::validate
    pub(crate) fn bounded(capacity: usize) -> Self {
        Self {
            items: ArrayQueue::new(capacity.clamp(1, MAX_POOL_CAPACITY)),
        }
    }

    /// Offer an instance to the pool. Returns false (dropping the
    /// instance) when the pool is full.
    #[inline]
    pub fn try_add(&self, item: T) -> bool {
        self.items.push(item).is_ok()
    }

    /// Claim an instance from the pool, if one is available.
    #[inline]
    pub fn try_pull(&self) -> Option<T> {
        self.items.pop()
    }

    /// Number of instances currently pooled.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when no instance is pooled.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number of pooled instances.
    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }
}

impl<T> std::fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_bounds() {
        assert!(ObjectPool::<u32>::new(0).is_err());
        assert!(ObjectPool::<u32>::new(MAX_POOL_CAPACITY + 1).is_err());
        assert!(ObjectPool::<u32>::new(MAX_POOL_CAPACITY).is_ok());
    }

    #[test]
    fn test_add_until_full() {
        let pool = ObjectPool::new(3).unwrap();
        assert!(pool.try_add(1));
        assert!(pool.try_add(2));
        assert!(pool.try_add(3));
        assert!(!pool.try_add(4));
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_pull_until_empty() {
        let pool = ObjectPool::new(2).unwrap();
        pool.try_add("a");
        pool.try_add("b");
        assert!(pool.try_pull().is_some());
        assert!(pool.try_pull().is_some());
        assert!(pool.try_pull().is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_recycle_round_trip() {
        let pool = ObjectPool::new(1).unwrap();
        assert!(pool.try_add(vec![1u8, 2, 3]));
        let item = pool.try_pull().unwrap();
        assert_eq!(item, vec![1, 2, 3]);
        assert!(pool.try_add(item));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_concurrent_bounded() {
        use std::sync::Arc;
        use std::thread;

        let pool = Arc::new(ObjectPool::new(8).unwrap());
        let mut handles = vec![];
        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                for i in 0..1_000 {
                    pool.try_add(i);
                    pool.try_pull();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.len() <= pool.capacity());
    }
}
