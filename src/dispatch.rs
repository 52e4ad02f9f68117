//! Handler interface and the per-callback dispatch context.
//!
//! The pool calls [`EventHandler::handle`] once per readiness event (and once
//! for a freshly added connection), from exactly one worker at a time per
//! connection. The handler receives a [`Dispatch`] through which it talks
//! back to the scheduler:
//!
//! | Call | Effect |
//! |------|--------|
//! | [`start_io`](Dispatch::start_io) | re-arm the connection once the handler returns |
//! | [`wait_begin`](Dispatch::wait_begin) / [`wait_end`](Dispatch::wait_end) | bracket blocking work so the group can run someone else |
//! | [`wait`](Dispatch::wait) | RAII form of the bracket |
//! | [`set_io_timeout`](Dispatch::set_io_timeout) | deadline for the next input |
//! | [`set_priority`](Dispatch::set_priority) | queue used for the next event |
//!
//! A handler that returns without calling `start_io` closes the connection.
//! Brackets left open when the handler returns (or panics) are closed by the
//! pool.

use crate::connection::{Connection, ConnectionId, ConnectionState, Priority, NO_DEADLINE};
use crate::pool::PoolShared;
use std::sync::Arc;
use std::time::Duration;

/// Callbacks invoked by the pool.
pub trait EventHandler: Send + Sync + 'static {
    /// Handles one readiness event for the dispatched connection.
    fn handle(&self, dispatch: &mut Dispatch<'_>);

    /// Called by the timer when an armed connection's read deadline passed.
    ///
    /// The pool never closes a connection on its own; the handler is expected
    /// to terminate it, typically by shutting the socket down so that a final
    /// readiness event is delivered and `handle` returns without re-arming.
    fn on_timeout(&self, connection: &Arc<Connection>) {
        let _ = connection;
    }

    /// Called once after the pool has released a connection.
    fn on_close(&self, connection: &Arc<Connection>) {
        let _ = connection;
    }
}

/// Context of one handler invocation.
pub struct Dispatch<'a> {
    shared: &'a Arc<PoolShared>,
    conn: &'a Arc<Connection>,
    rearm: bool,
}

impl<'a> Dispatch<'a> {
    pub(crate) fn new(shared: &'a Arc<PoolShared>, conn: &'a Arc<Connection>) -> Self {
        Self {
            shared,
            conn,
            rearm: false,
        }
    }

    /// The dispatched connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        self.conn
    }

    /// Shorthand for `connection().id()`.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.conn.id()
    }

    /// Index of the group running this dispatch.
    #[must_use]
    pub fn group(&self) -> usize {
        self.conn.group()
    }

    /// Asks for the connection to be re-armed for the next read event.
    ///
    /// The registration happens after the handler returns, so the next event
    /// can never be dispatched while this one is still running.
    pub fn start_io(&mut self) {
        self.rearm = true;
    }

    /// Withdraws an earlier [`start_io`](Self::start_io).
    pub fn cancel_io(&mut self) {
        self.rearm = false;
    }

    /// Whether the connection will be re-armed.
    #[must_use]
    pub fn rearm_requested(&self) -> bool {
        self.rearm
    }

    /// Marks the start of blocking work. Nestable; only the outermost call
    /// affects scheduling.
    pub fn wait_begin(&self) {
        let group = {
            let mut sched = self.conn.sched.lock();
            sched.waiting_depth += 1;
            if sched.waiting_depth != 1 {
                return;
            }
            sched.state = ConnectionState::Waiting;
            sched.group
        };
        self.shared.wait_begin(group);
    }

    /// Marks the end of blocking work started by [`wait_begin`](Self::wait_begin).
    pub fn wait_end(&self) {
        let group = {
            let mut sched = self.conn.sched.lock();
            if sched.waiting_depth == 0 {
                tracing::warn!(connection = %self.conn.id(), "wait_end without wait_begin");
                return;
            }
            sched.waiting_depth -= 1;
            if sched.waiting_depth != 0 {
                return;
            }
            sched.state = ConnectionState::Dispatched;
            sched.group
        };
        self.shared.wait_end(group);
    }

    /// Brackets blocking work until the returned guard is dropped.
    #[must_use = "the wait ends when the guard is dropped"]
    pub fn wait(&self) -> WaitGuard<'_, 'a> {
        self.wait_begin();
        WaitGuard { dispatch: self }
    }

    /// Sets the deadline for the next input on this connection.
    ///
    /// The deadline is measured on the pool clock, which advances once per
    /// stall tick, so one tick is added to keep the timeout from firing early.
    pub fn set_io_timeout(&self, timeout: Duration) {
        let timer = &self.shared.timer;
        let micros = u64::try_from(timeout.as_micros()).unwrap_or(u64::MAX);
        let abs = timer
            .current_micros()
            .saturating_add(timer.tick_micros())
            .saturating_add(micros)
            .min(NO_DEADLINE - 1);
        self.conn.sched.lock().abs_wait_timeout = abs;
        timer.set_next_timeout_check(abs);
    }

    /// Removes the read deadline.
    pub fn clear_io_timeout(&self) {
        self.conn.sched.lock().abs_wait_timeout = NO_DEADLINE;
    }

    /// Sets the queue used for the connection's next event.
    pub fn set_priority(&self, priority: Priority) {
        self.conn.set_priority(priority);
    }

    /// Closes brackets the handler left open and reports whether to re-arm.
    pub(crate) fn finish(self) -> bool {
        let open = self.conn.waiting_depth();
        if open > 0 {
            tracing::debug!(connection = %self.conn.id(), open, "closing unbalanced wait brackets");
            while self.conn.waiting_depth() > 0 {
                self.wait_end();
            }
        }
        self.rearm
    }
}

/// Ends a wait bracket on drop. See [`Dispatch::wait`].
pub struct WaitGuard<'d, 'a> {
    dispatch: &'d Dispatch<'a>,
}

impl Drop for WaitGuard<'_, '_> {
    fn drop(&mut self) {
        self.dispatch.wait_end();
    }
}
