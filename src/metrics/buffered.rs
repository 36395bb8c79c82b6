//! Buffered sample intake shared by aggregators that fold samples in
//! batches.
//!
//! Producers append to the current values buffer with a single atomic
//! increment. The producer that fills a buffer swaps in a fresh one and
//! pays for the flush of the full buffer into the kind's running state;
//! everyone else never blocks. At the period boundary the cycle thread
//! takes the writer side of the latch and drains whatever is left.

use crate::core::AggregationConfig;
use crate::metrics::aggregator::PeriodWindow;
use crate::metrics::latch::ReadersWriterLatch;
use crate::metrics::pool::ObjectPool;
use crate::metrics::values_buffer::ValuesBuffer;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Lock-free value intake with deferred flush.
pub(crate) struct BufferedIntake {
    current: ArcSwap<ValuesBuffer>,
    spares: ObjectPool<Arc<ValuesBuffer>>,
    latch: ReadersWriterLatch,
    buffer_capacity: usize,
    synchronized: bool,
}

impl BufferedIntake {
    pub fn new(config: &AggregationConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(ValuesBuffer::bounded(config.values_buffer_capacity)),
            spares: ObjectPool::bounded(config.spare_buffer_capacity),
            latch: ReadersWriterLatch::new(),
            buffer_capacity: config.values_buffer_capacity,
            synchronized: config.collect_synchronized,
        }
    }

    /// Record one sample, flushing the outgoing buffer when this call
    /// happens to be the one that filled it. `fold` merges a
    /// counted-and-locked buffer into the kind's running state.
    pub fn collect<F>(&self, window: &PeriodWindow, value: f64, fold: F) -> bool
    where
        F: Fn(&ValuesBuffer, usize),
    {
        if self.synchronized {
            let _reader = self.latch.read();
            if !window.is_active() {
                return false;
            }
            self.collect_inner(window, value, &fold)
        } else {
            self.collect_inner(window, value, &fold)
        }
    }

    fn collect_inner<F>(&self, window: &PeriodWindow, value: f64, fold: &F) -> bool
    where
        F: Fn(&ValuesBuffer, usize),
    {
        let mut current = self.current.load();
        loop {
            if current.try_add(value) {
                return true;
            }
            if !window.is_active() {
                return false;
            }

            let fresh = self
                .spares
                .try_pull()
                .unwrap_or_else(|| Arc::new(ValuesBuffer::bounded(self.buffer_capacity)));
            let seeded = fresh.try_add(value);
            debug_assert!(seeded, "a fresh buffer must accept its first sample");

            let previous = self.current.compare_and_swap(&current, Arc::clone(&fresh));
            if Arc::ptr_eq(&*previous, &*current) {
                // Won the swap: this producer owns the full buffer now.
                self.flush(&previous, fold);
                self.recycle(arc_swap::Guard::into_inner(previous));
                return true;
            }
            // Lost the swap: hand the seeded buffer back and retry
            // against whoever won.
            self.recycle(fresh);
            current = self.current.load();
        }
    }

    /// Writer-side drain at the period boundary. Keeps swapping in
    /// fresh buffers until a drained one comes back empty, so samples
    /// landed by in-flight producers are still folded.
    pub fn drain<F>(&self, fold: F)
    where
        F: Fn(&ValuesBuffer, usize),
    {
        let _writer = self.latch.write();
        loop {
            let fresh = self
                .spares
                .try_pull()
                .unwrap_or_else(|| Arc::new(ValuesBuffer::bounded(self.buffer_capacity)));
            let outgoing = self.current.swap(fresh);
            let drained = self.flush(&outgoing, &fold);
            self.recycle(outgoing);
            if drained == 0 {
                return;
            }
        }
    }

    /// Lock the buffer and fold its contents. Returns the number of
    /// samples folded (0 when the buffer was empty or already locked).
    fn flush<F>(&self, buffer: &ValuesBuffer, fold: &F) -> usize
    where
        F: Fn(&ValuesBuffer, usize),
    {
        match buffer.try_count_and_lock() {
            Some(count) if count > 0 => {
                fold(buffer, count);
                count
            }
            _ => 0,
        }
    }

    fn recycle(&self, buffer: Arc<ValuesBuffer>) {
        buffer.reset();
        self.spares.try_add(buffer);
    }

    /// Clear the live buffer. Only called while the owning aggregator
    /// is inactive and being prepared for pool reuse, so samples strayed
    /// in after the boundary drain are discarded rather than leaked
    /// into the next period.
    pub fn reset_current(&self) {
        self.current.load().reset();
    }

    #[cfg(test)]
    pub fn spare_count(&self) -> usize {
        self.spares.len()
    }
}

impl std::fmt::Debug for BufferedIntake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedIntake")
            .field("buffer_capacity", &self.buffer_capacity)
            .field("synchronized", &self.synchronized)
            .field("spares", &self.spares.len())
            .finish()
    }
}
