//! Stall detection and read-timeout enforcement.
//!
//! A single background thread ticks every `stall_limit`. On each tick it
//! refreshes the pool clock, runs the stall check on every group that owns
//! connections and, when the earliest published read deadline has passed,
//! scans armed connections for expired deadlines.
//!
//! The pool clock is a microsecond counter since pool start, cached once per
//! tick. Readers (queue stamping, deadline computation) use the cached value
//! and tolerate being up to one tick behind.

use crate::pool::PoolShared;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of waiting for the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    /// The interval elapsed.
    Tick,
    /// Woken early, typically because the interval changed.
    Interrupted,
    /// The timer is stopping.
    Shutdown,
}

/// Shared clock and tick control.
#[derive(Debug)]
pub(crate) struct PoolTimer {
    epoch: Instant,
    current_micros: AtomicU64,
    next_timeout_check: AtomicU64,
    tick_micros: AtomicU64,
    shutdown: Mutex<bool>,
    cond: Condvar,
}

impl PoolTimer {
    pub(crate) fn new(tick_interval: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            current_micros: AtomicU64::new(0),
            next_timeout_check: AtomicU64::new(u64::MAX),
            tick_micros: AtomicU64::new(duration_micros(tick_interval)),
            shutdown: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Cached pool time in microseconds.
    pub(crate) fn current_micros(&self) -> u64 {
        self.current_micros.load(Ordering::Acquire)
    }

    /// Reads the real clock and caches it.
    pub(crate) fn refresh(&self) -> u64 {
        let now = duration_micros(self.epoch.elapsed());
        self.current_micros.store(now, Ordering::Release);
        now
    }

    pub(crate) fn tick_interval(&self) -> Duration {
        Duration::from_micros(self.tick_micros())
    }

    pub(crate) fn tick_micros(&self) -> u64 {
        self.tick_micros.load(Ordering::Relaxed)
    }

    /// Changes the tick interval and wakes the timer so it takes effect now.
    pub(crate) fn set_tick_interval(&self, interval: Duration) {
        let _guard = self.shutdown.lock();
        self.tick_micros
            .store(duration_micros(interval), Ordering::Relaxed);
        self.cond.notify_one();
    }

    /// Lowers the next scan time to `abs` if it is earlier.
    pub(crate) fn set_next_timeout_check(&self, abs: u64) {
        self.next_timeout_check.fetch_min(abs, Ordering::AcqRel);
    }

    pub(crate) fn next_timeout_check(&self) -> u64 {
        self.next_timeout_check.load(Ordering::Acquire)
    }

    /// If a deadline is due at `now`, resets the next scan time to "never"
    /// and returns true. The scan republishes the survivors.
    pub(crate) fn take_due_timeout_check(&self, now: u64) -> bool {
        if self.next_timeout_check() > now {
            return false;
        }
        self.next_timeout_check.store(u64::MAX, Ordering::Release);
        true
    }

    pub(crate) fn wait_tick(&self) -> TickOutcome {
        let mut shutdown = self.shutdown.lock();
        if *shutdown {
            return TickOutcome::Shutdown;
        }
        let timed_out = self
            .cond
            .wait_for(&mut shutdown, self.tick_interval())
            .timed_out();
        if *shutdown {
            TickOutcome::Shutdown
        } else if timed_out {
            TickOutcome::Tick
        } else {
            TickOutcome::Interrupted
        }
    }

    pub(crate) fn stop(&self) {
        let mut shutdown = self.shutdown.lock();
        *shutdown = true;
        self.cond.notify_all();
    }
}

fn duration_micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

/// Body of the timer thread.
pub(crate) fn timer_main(shared: Arc<PoolShared>) {
    shared.timer.refresh();
    tracing::debug!(interval = ?shared.timer.tick_interval(), "stall timer started");
    loop {
        match shared.timer.wait_tick() {
            TickOutcome::Shutdown => break,
            TickOutcome::Interrupted => continue,
            TickOutcome::Tick => {}
        }
        let now = shared.timer.refresh();
        for group in 0..shared.groups.len() {
            shared.check_stall(group, now);
        }
        if shared.timer.take_due_timeout_check(now) {
            shared.timeout_check(now);
        }
    }
    tracing::debug!("stall timer stopped");
}
