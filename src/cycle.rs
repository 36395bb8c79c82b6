//! Aggregation cycle driver.
//!
//! A dedicated OS thread wakes at slot-aligned period boundaries and
//! invokes the manager's swap-and-submit step. The thread is never
//! drawn from a shared pool: a stalled sink must not be able to starve
//! unrelated work, and the loop itself survives any iteration failure.

use crate::core::{clock, AggregationConfig, KoosteError, Result};
use crate::metrics::registry::MetricCollectionManager;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Lifecycle states of the driver. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DriverState {
    /// Constructed, thread not yet spawned.
    NotStarted = 0,
    /// Cycle thread is live.
    Running = 1,
    /// Shutdown signalled; the thread has not yet observed it.
    ShutdownRequested = 2,
    /// Cycle thread has exited. Terminal for the loop.
    ShutdownCompleted = 3,
    /// Driver resources released. Terminal.
    Disposed = 4,
}

impl DriverState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => DriverState::NotStarted,
            1 => DriverState::Running,
            2 => DriverState::ShutdownRequested,
            3 => DriverState::ShutdownCompleted,
            _ => DriverState::Disposed,
        }
    }

    fn name(self) -> &'static str {
        match self {
            DriverState::NotStarted => "not-started",
            DriverState::Running => "running",
            DriverState::ShutdownRequested => "shutdown-requested",
            DriverState::ShutdownCompleted => "shutdown-completed",
            DriverState::Disposed => "disposed",
        }
    }
}

/// Wake latency accepted before a cycle start is published as the
/// actual wall time instead of the aligned target.
const TARGET_TOLERANCE_MS: i64 = 1_500;

/// Poll schedule for callers waiting on shutdown completion.
const SHUTDOWN_POLL_MS: [u64; 7] = [1, 1, 1, 25, 50, 100, 500];

/// Auto-reset event: one waiter consumes one signal.
struct AutoResetEvent {
    signaled: Mutex<bool>,
    wake: Condvar,
}

impl AutoResetEvent {
    fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    /// Wait until signaled or `timeout` elapses; consumes the signal.
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.wake.wait_until(&mut signaled, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *signaled, false)
    }

    fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.wake.notify_one();
    }
}

struct DriverShared {
    state: AtomicU8,
    event: AutoResetEvent,
}

impl DriverShared {
    fn state(&self) -> DriverState {
        DriverState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: DriverState, to: DriverState) -> std::result::Result<(), u8> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
    }
}

type CycleCallback = Box<dyn FnMut(DateTime<Utc>) + Send>;

/// Drives the periodic aggregation cycle on its own thread.
pub struct AggregationCycleDriver {
    shared: Arc<DriverShared>,
    period: Duration,
    callback: Mutex<Option<CycleCallback>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AggregationCycleDriver {
    /// Create a driver invoking `callback` with each cycle's rounded
    /// start time.
    pub fn new(
        config: &AggregationConfig,
        callback: impl FnMut(DateTime<Utc>) + Send + 'static,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(DriverShared {
                state: AtomicU8::new(DriverState::NotStarted as u8),
                event: AutoResetEvent::new(),
            }),
            period: config.period_length,
            callback: Mutex::new(Some(Box::new(callback))),
            handle: Mutex::new(None),
        })
    }

    /// Create a driver bound to `manager`'s swap-and-submit step.
    pub fn for_manager(manager: Arc<MetricCollectionManager>) -> Result<Self> {
        let config = manager.config().clone();
        Self::new(&config, move |cycle_start| {
            manager.run_collection_cycle(cycle_start);
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DriverState {
        self.shared.state()
    }

    /// Spawn the cycle thread. Succeeds only from the initial state.
    pub fn start(&self) -> Result<()> {
        self.shared
            .transition(DriverState::NotStarted, DriverState::Running)
            .map_err(|observed| {
                KoosteError::DriverState(DriverState::from_u8(observed).name())
            })?;

        let callback = self.callback.lock().take().ok_or_else(|| {
            KoosteError::misuse("cycle callback already consumed")
        })?;
        let shared = Arc::clone(&self.shared);
        let period = self.period;
        let spawned = std::thread::Builder::new()
            .name("kooste-cycle".to_owned())
            .spawn(move || cycle_loop(shared, period, callback));
        match spawned {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                // Roll the state back so the caller may retry.
                let _ = self
                    .shared
                    .transition(DriverState::Running, DriverState::NotStarted);
                Err(KoosteError::misuse(format!(
                    "failed to spawn cycle thread: {e}"
                )))
            }
        }
    }

    /// Request shutdown and wait until the cycle thread has exited. No
    /// further cycle callbacks fire once this returns. Safe to call
    /// from several threads; every caller blocks until completion.
    pub fn shutdown(&self) {
        if self
            .shared
            .transition(DriverState::Running, DriverState::ShutdownRequested)
            .is_ok()
        {
            self.shared.event.set();
        }
        // A driver that never started completes immediately.
        let _ = self
            .shared
            .transition(DriverState::NotStarted, DriverState::ShutdownCompleted);

        let mut polls = SHUTDOWN_POLL_MS.iter().cycle();
        while (self.shared.state.load(Ordering::Acquire))
            < DriverState::ShutdownCompleted as u8
        {
            let delay = polls.next().copied().unwrap_or(500);
            std::thread::sleep(Duration::from_millis(delay));
        }

        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AggregationCycleDriver {
    fn drop(&mut self) {
        // The thread must be joined before the event is torn down.
        self.shutdown();
        let _ = self
            .shared
            .transition(DriverState::ShutdownCompleted, DriverState::Disposed);
    }
}

impl std::fmt::Debug for AggregationCycleDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationCycleDriver")
            .field("state", &self.state())
            .field("period", &self.period)
            .finish()
    }
}

fn cycle_loop(shared: Arc<DriverShared>, period: Duration, mut callback: CycleCallback) {
    tracing::info!(period_secs = period.as_secs(), "aggregation cycle started");

    while shared.state() == DriverState::Running {
        let now = Utc::now();
        let target = next_cycle_target(now, period.as_secs());
        let wait = (target - now)
            .to_std()
            .unwrap_or_default()
            .max(Duration::from_millis(1));
        shared.event.wait_timeout(wait);
        if shared.state() != DriverState::Running {
            break;
        }

        let actual = Utc::now();
        let cycle_start = if (actual - target).num_milliseconds().abs() <= TARGET_TOLERANCE_MS {
            target
        } else {
            clock::round_down_to_second(actual)
        };

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            callback(cycle_start)
        }));
        if let Err(payload) = outcome {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            tracing::error!(%cycle_start, %message, "collection cycle iteration failed");
        }
    }

    let _ = shared.transition(
        DriverState::ShutdownRequested,
        DriverState::ShutdownCompleted,
    );
    tracing::info!("aggregation cycle stopped");
}

/// Next slot-aligned cycle boundary after `now`.
///
/// Sub-minute periods align to `floor(second / P) * P` within the
/// minute; minute multiples align to the minute itself. A boundary that
/// would arrive too soon is pushed out one period so producers get a
/// reasonable window.
fn next_cycle_target(now: DateTime<Utc>, period_secs: u64) -> DateTime<Utc> {
    let minute = clock::round_down_to_minute(now);
    let target = if period_secs < 60 {
        let slot = (u64::from(now.second()) / period_secs) * period_secs;
        minute + ChronoDuration::seconds((slot + period_secs) as i64)
    } else {
        minute + ChronoDuration::seconds(period_secs as i64)
    };

    let min_lead_secs: i64 = match period_secs {
        0..=5 => 1,
        6..=10 => 2,
        11..=60 => 5,
        _ => 15,
    };
    if (target - now).num_milliseconds() <= min_lead_secs * 1_000 {
        target + ChronoDuration::seconds(period_secs as i64)
    } else {
        target
    }
}
