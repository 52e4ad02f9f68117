//! Worker threads and the dispatch loop.
//!
//! A worker repeatedly asks its group for a ready connection
//! ([`get_event`]) and runs the handler for it. While looking for work it
//! may become the group's listener, blocking in the poller on behalf of the
//! whole group. With nothing to do it parks on its own condition variable at
//! the front of the idle list and exits once the idle timeout passes without
//! being woken.

use crate::connection::Connection;
use crate::error::{Error, ErrorKind};
use crate::group::GroupState;
use crate::poller::Events;
use crate::pool::PoolShared;
use parking_lot::{Condvar, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identifier of a worker thread, unique within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Why a parked worker resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Popped from the idle list to take new work.
    Signalled,
    /// The group is shutting down.
    Shutdown,
    /// The idle timeout passed without a signal.
    TimedOut,
    /// Woke without a signal before the timeout.
    Spurious,
}

const REASON_NONE: u8 = 0;
const REASON_SIGNALLED: u8 = 1;
const REASON_SHUTDOWN: u8 = 2;

/// Per-worker wakeup slot.
///
/// The condition variable is only ever waited on with the owning group's
/// state lock, and the reason slot is written by whoever pops the worker
/// from the idle list.
pub(crate) struct WorkerSignal {
    id: WorkerId,
    cond: Condvar,
    reason: AtomicU8,
}

impl WorkerSignal {
    pub(crate) fn new(id: WorkerId) -> Self {
        Self {
            id,
            cond: Condvar::new(),
            reason: AtomicU8::new(REASON_NONE),
        }
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    /// Tags the worker and wakes it. The caller has already removed it from
    /// the idle list.
    pub(crate) fn signal(&self, reason: WakeReason) {
        let tag = match reason {
            WakeReason::Shutdown => REASON_SHUTDOWN,
            _ => REASON_SIGNALLED,
        };
        self.reason.store(tag, Ordering::Release);
        self.cond.notify_one();
    }

    fn take_reason(&self) -> Option<WakeReason> {
        decode(self.reason.swap(REASON_NONE, Ordering::AcqRel))
    }

    pub(crate) fn peek_reason(&self) -> Option<WakeReason> {
        decode(self.reason.load(Ordering::Acquire))
    }
}

fn decode(tag: u8) -> Option<WakeReason> {
    match tag {
        REASON_SIGNALLED => Some(WakeReason::Signalled),
        REASON_SHUTDOWN => Some(WakeReason::Shutdown),
        _ => None,
    }
}

impl fmt::Debug for WorkerSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerSignal")
            .field("id", &self.id)
            .field("reason", &self.peek_reason())
            .finish_non_exhaustive()
    }
}

/// Parks `me` on the idle list until signalled or `deadline` passes.
///
/// A worker that was signalled has already been removed from the list by
/// the signaller; otherwise it removes itself. A signal always wins over a
/// concurrent timeout so that the work it announced is not lost.
pub(crate) fn park(
    me: &Arc<WorkerSignal>,
    st: &mut MutexGuard<'_, GroupState>,
    deadline: Instant,
) -> WakeReason {
    me.take_reason();
    st.idle.push_front(Arc::clone(me));
    st.deactivate();
    let timed_out = me.cond.wait_until(st, deadline).timed_out();
    st.activate();
    match me.take_reason() {
        Some(reason) => reason,
        None => {
            st.idle.retain(|w| w.id != me.id);
            if timed_out {
                WakeReason::TimedOut
            } else {
                WakeReason::Spurious
            }
        }
    }
}

/// Entry point of a worker thread.
pub(crate) fn worker_main(shared: Arc<PoolShared>, group: usize, me: Arc<WorkerSignal>) {
    if let Some(hook) = &shared.config.on_thread_start {
        hook();
    }
    tracing::debug!(group, worker = %me.id(), "worker started");

    let mut events = Events::with_capacity(shared.config.max_events);
    let mut handled: u64 = 0;
    while let Some(conn) = get_event(&shared, group, &me, &mut events) {
        handled += 1;
        shared.dispatch(conn);
    }

    shared.worker_exited(group);
    tracing::debug!(group, worker = %me.id(), handled, "worker exiting");
    if let Some(hook) = &shared.config.on_thread_stop {
        hook();
    }
}

/// Returns the next connection to handle, or `None` when the worker should
/// exit (shutdown or idle timeout).
pub(crate) fn get_event(
    shared: &Arc<PoolShared>,
    group: usize,
    me: &Arc<WorkerSignal>,
    events: &mut Events,
) -> Option<Arc<Connection>> {
    let oversubscribe = shared.config.oversubscribe;
    let deadline = Instant::now() + shared.config.idle_timeout;
    let mut st = shared.groups[group].state.lock();

    let conn = loop {
        if st.shutdown {
            break None;
        }
        let oversubscribed = st.too_many_threads(oversubscribe);

        if !oversubscribed {
            if let Some(conn) = st.queue_get() {
                break Some(conn);
            }
        }

        if st.listener.is_none() && st.poller.is_some() {
            st.listener = Some(me.id());
            st.deactivate();
            let conn = listen(shared, group, &mut st, events);
            st.activate();
            st.listener = None;
            break conn;
        }

        if !oversubscribed {
            if let Some(poller) = st.poller.clone() {
                match poller.wait(events, Some(Duration::ZERO)) {
                    Ok(0) => {}
                    Ok(_) => {
                        let now = shared.timer.current_micros();
                        st.queue_put_events(events, now);
                        if let Some(conn) = st.queue_get() {
                            break Some(conn);
                        }
                        continue;
                    }
                    Err(err) => {
                        let err = Error::poller(ErrorKind::PollerWait, err);
                        shared.poller_failed(group, &mut st, &err);
                        continue;
                    }
                }
            }
        }

        match park(me, &mut st, deadline) {
            WakeReason::TimedOut => break None,
            reason => tracing::trace!(group, worker = %me.id(), ?reason, "worker resumed"),
        }
    };

    st.stalled = false;
    conn
}

/// Blocks in the group poller on behalf of the group.
///
/// Returns a connection for the listener to handle itself, or `None` on
/// shutdown. Runs with the listener slot taken and the caller not counted
/// as active.
fn listen(
    shared: &Arc<PoolShared>,
    group: usize,
    st: &mut MutexGuard<'_, GroupState>,
    events: &mut Events,
) -> Option<Arc<Connection>> {
    loop {
        if st.shutdown {
            return None;
        }
        let poller = st.poller.clone()?;
        let result = MutexGuard::unlocked(st, || poller.wait(events, None));
        if st.shutdown {
            return None;
        }
        let count = match result {
            Ok(0) => continue,
            Ok(count) => count,
            Err(err) => {
                let err = Error::poller(ErrorKind::PollerWait, err);
                shared.poller_failed(group, st, &err);
                return None;
            }
        };

        st.io_event_count += count as u64;
        let listener_picks_event = st.queues.is_empty();
        let now = shared.timer.current_micros();
        st.queue_put_events(events, now);
        tracing::trace!(group, count, listener_picks_event, "listener collected events");

        if listener_picks_event {
            if let Some(conn) = st.queue_get() {
                return Some(conn);
            }
            continue;
        }

        // Work is queued and nobody is running: hand it to a worker. A
        // single-thread group would otherwise wait for the timer.
        if st.active_thread_count == 0 && !st.wake_thread() && st.thread_count == 1 {
            if let Err(err) = shared.create_worker(group, st) {
                tracing::debug!(group, error = %err, "listener could not add a worker");
            }
        }
    }
}
