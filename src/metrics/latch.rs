//! Many-reader / single-writer latch.
//!
//! Gates per-metric buffer flushes against the period-boundary flush.
//! Readers share a single underlying binary semaphore through a
//! lightswitch: the first reader in acquires it, the last reader out
//! releases it. With synchronized collection disabled the writer is
//! uncontended and readers pay one increment and one decrement.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Binary semaphore with a blocking acquire and an optional timeout.
struct BinarySemaphore {
    available: Mutex<bool>,
    signal: Condvar,
}

impl BinarySemaphore {
    fn new() -> Self {
        Self {
            available: Mutex::new(true),
            signal: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut available = self.available.lock();
        while !*available {
            self.signal.wait(&mut available);
        }
        *available = false;
    }

    fn try_acquire_for(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut available = self.available.lock();
        while !*available {
            if self.signal.wait_until(&mut available, deadline).timed_out() {
                return false;
            }
        }
        *available = false;
        true
    }

    fn release(&self) {
        let mut available = self.available.lock();
        *available = true;
        self.signal.notify_one();
    }
}

/// Reader-writer latch with RAII guards on both sides.
pub struct ReadersWriterLatch {
    readers: AtomicUsize,
    /// Serializes reader entry so a reader arriving while the writer
    /// holds the semaphore queues up instead of slipping past.
    turnstile: Mutex<()>,
    semaphore: BinarySemaphore,
}

impl ReadersWriterLatch {
    pub fn new() -> Self {
        Self {
            readers: AtomicUsize::new(0),
            turnstile: Mutex::new(()),
            semaphore: BinarySemaphore::new(),
        }
    }

    /// Enter the shared side. Blocks only while a writer is active.
    pub fn read(&self) -> ReadGuard<'_> {
        {
            let _entry = self.turnstile.lock();
            if self.readers.fetch_add(1, Ordering::AcqRel) == 0 {
                self.semaphore.acquire();
            }
        }
        ReadGuard { latch: self }
    }

    /// Enter the exclusive side. Blocks until all readers have left.
    pub fn write(&self) -> WriteGuard<'_> {
        self.semaphore.acquire();
        WriteGuard { latch: self }
    }

    /// Try to enter the exclusive side within `timeout`.
    pub fn try_write_for(&self, timeout: Duration) -> Option<WriteGuard<'_>> {
        if self.semaphore.try_acquire_for(timeout) {
            Some(WriteGuard { latch: self })
        } else {
            None
        }
    }
}

impl Default for ReadersWriterLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared-side guard; the last one dropped releases the writer gate.
pub struct ReadGuard<'a> {
    latch: &'a ReadersWriterLatch,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if self.latch.readers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.latch.semaphore.release();
        }
    }
}

/// Exclusive-side guard.
pub struct WriteGuard<'a> {
    latch: &'a ReadersWriterLatch,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.latch.semaphore.release();
    }
}
