//! Fixed-capacity lock-free append buffer for sample values.
//!
//! Decouples the high-rate collect path from the more expensive fold
//! into running aggregate state: producers pay one atomic increment per
//! sample, and the buffer simply stops accepting once full instead of
//! spinning. A flusher takes a lock-and-count snapshot exactly once per
//! buffer lifetime, after which no further append can succeed until the
//! buffer is reset for reuse.

use crate::core::config::MAX_VALUES_BUFFER_CAPACITY;
use crate::core::{KoosteError, Result};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Append-only buffer of `f64` samples with a one-shot lock-and-count
/// snapshot.
pub struct ValuesBuffer {
    /// Sample slots, stored as raw `f64` bits. Each index is claimed by
    /// exactly one producer, so a relaxed store per slot is sufficient.
    values: Box<[AtomicU64]>,
    /// Index of the most recently claimed slot; -1 when empty, pinned at
    /// capacity once the buffer is full or locked.
    prev_add_index: AtomicI64,
    locked: AtomicBool,
}

impl ValuesBuffer {
    /// Create an empty buffer with the given slot count.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > MAX_VALUES_BUFFER_CAPACITY {
            return Err(KoosteError::BufferCapacity {
                requested: capacity,
                max: MAX_VALUES_BUFFER_CAPACITY,
            });
        }
        let values = (0..capacity).map(|_| AtomicU64::new(0)).collect();
        Ok(Self {
            values,
            prev_add_index: AtomicI64::new(-1),
            locked: AtomicBool::new(false),
        })
    }

    /// Internal constructor for capacities that were already validated
    /// through config validation; clamps instead of failing so buffer
    /// allocation on the collect path stays infallible.
    pub(crate) fn bounded(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_VALUES_BUFFER_CAPACITY);
        Self {
            values: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            prev_add_index: AtomicI64::new(-1),
            locked: AtomicBool::new(false),
        }
    }

    /// Slot count.
    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    /// Append a sample. Returns false once the buffer is full or has
    /// been counted-and-locked; the caller is expected to swap in a
    /// fresh buffer rather than retry here.
    #[inline]
    pub fn try_add(&self, value: f64) -> bool {
        let capacity = self.values.len() as i64;
        let idx = self.prev_add_index.fetch_add(1, Ordering::AcqRel) + 1;
        if idx >= 0 && idx < capacity {
            self.values[idx as usize].store(value.to_bits(), Ordering::Release);
            return true;
        }
        // Pin the counter at capacity so sustained pressure on a full
        // buffer cannot overflow it. A lost race here just means another
        // producer already pinned it.
        let _ = self.prev_add_index.compare_exchange(
            idx,
            capacity,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
        false
    }

    /// Stop further appends and report how many slots were claimed.
    /// Succeeds at most once per buffer lifetime; returns `None` when
    /// the buffer was already locked.
    pub fn try_count_and_lock(&self) -> Option<usize> {
        if self.locked.swap(true, Ordering::AcqRel) {
            return None;
        }
        let capacity = self.values.len() as i64;
        let prev = self.prev_add_index.swap(capacity, Ordering::AcqRel);
        Some((prev + 1).clamp(0, capacity) as usize)
    }

    /// Read the sample in slot `index`. Only meaningful for indices
    /// below the count returned by [`try_count_and_lock`].
    ///
    /// [`try_count_and_lock`]: ValuesBuffer::try_count_and_lock
    #[inline]
    pub fn get(&self, index: usize) -> f64 {
        f64::from_bits(self.values[index].load(Ordering::Acquire))
    }

    /// Return the buffer to its pristine state for reuse. Appends stay
    /// pinned out for the whole procedure, so no producer can observe a
    /// half-reset buffer.
    pub fn reset(&self) {
        let capacity = self.values.len() as i64;
        self.locked.store(true, Ordering::Release);
        self.prev_add_index.store(capacity, Ordering::SeqCst);
        for slot in self.values.iter() {
            slot.store(0, Ordering::Relaxed);
        }
        self.locked.store(false, Ordering::Release);
        self.prev_add_index.store(-1, Ordering::Release);
    }
}

impl std::fmt::Debug for ValuesBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValuesBuffer")
            .field("capacity", &self.capacity())
            .field("prev_add_index", &self.prev_add_index.load(Ordering::Relaxed))
            .field("locked", &self.locked.load(Ordering::Relaxed))
            .finish()
    }
}
