//! Per-client scheduling record.
//!
//! A [`Connection`] is produced by the acceptor and handed to
//! [`Pool::add`](crate::Pool::add). The pool owns the scheduling half of the
//! record; the acceptor keeps the socket itself.
//!
//! Lock order: a group's state lock is always taken before a connection's
//! scheduling lock, never the other way around.

use crate::poller::{RawHandle, Token};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Sentinel for "no deadline" in microsecond fields.
pub(crate) const NO_DEADLINE: u64 = u64::MAX;

/// Stable identifier of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Index of the group this id maps to when `group_count` groups are active.
    #[must_use]
    pub fn group_index(self, group_count: usize) -> usize {
        let count = group_count.max(1) as u64;
        // Fits: the remainder is below `group_count`.
        (self.0 % count) as usize
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Queue a connection waits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    /// Served first. New connections start here.
    #[default]
    High = 0,
    /// Served when no high-priority work is queued.
    Low = 1,
}

impl Priority {
    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

/// Lifecycle of a connection inside the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Produced by the acceptor, not yet added.
    Created,
    /// Sitting in a group queue.
    Queued,
    /// A worker is running the handler for it.
    Dispatched,
    /// The handler is inside a `wait_begin`/`wait_end` bracket.
    Waiting,
    /// Registered with the group poller, waiting for input.
    Armed,
    /// Removed from the pool.
    Closed,
}

#[derive(Debug)]
pub(crate) struct ConnectionSched {
    pub(crate) group: usize,
    pub(crate) priority: Priority,
    pub(crate) dequeue_time: u64,
    pub(crate) abs_wait_timeout: u64,
    /// Registration token in the owning group's poller; `Some` while bound.
    pub(crate) token: Option<Token>,
    pub(crate) waiting_depth: u32,
    pub(crate) state: ConnectionState,
}

/// Scheduling record for one client connection.
pub struct Connection {
    id: ConnectionId,
    handle: RawHandle,
    pub(crate) sched: Mutex<ConnectionSched>,
}

impl Connection {
    /// Creates a connection record for a socket accepted elsewhere.
    ///
    /// `handle` must stay open until the pool reports the connection closed
    /// (see [`EventHandler::on_close`](crate::EventHandler::on_close)).
    #[must_use]
    pub fn new(id: ConnectionId, handle: RawHandle) -> Arc<Self> {
        Arc::new(Self {
            id,
            handle,
            sched: Mutex::new(ConnectionSched {
                group: 0,
                priority: Priority::High,
                dequeue_time: 0,
                abs_wait_timeout: NO_DEADLINE,
                token: None,
                waiting_depth: 0,
                state: ConnectionState::Created,
            }),
        })
    }

    /// The connection id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The raw socket handle.
    #[must_use]
    pub fn handle(&self) -> RawHandle {
        self.handle
    }

    /// Index of the group currently owning this connection.
    #[must_use]
    pub fn group(&self) -> usize {
        self.sched.lock().group
    }

    /// Current priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.sched.lock().priority
    }

    /// Sets the queue used for this connection's next readiness event.
    pub fn set_priority(&self, priority: Priority) {
        self.sched.lock().priority = priority;
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.sched.lock().state
    }

    /// True once the handle has been registered with a poller.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.sched.lock().token.is_some()
    }

    /// Absolute read deadline in pool-clock microseconds, if any.
    #[must_use]
    pub fn wait_deadline_micros(&self) -> Option<u64> {
        let abs = self.sched.lock().abs_wait_timeout;
        (abs != NO_DEADLINE).then_some(abs)
    }

    /// Nesting depth of open wait brackets.
    #[must_use]
    pub fn waiting_depth(&self) -> u32 {
        self.sched.lock().waiting_depth
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sched = self.sched.lock();
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("group", &sched.group)
            .field("priority", &sched.priority)
            .field("state", &sched.state)
            .finish_non_exhaustive()
    }
}
