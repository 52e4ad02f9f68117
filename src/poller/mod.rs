//! Readiness notification abstraction.
//!
//! Every thread group owns exactly one [`Poller`]. The pool uses it in a
//! one-shot fashion: once a handle has been reported readable it is removed
//! from notification until the connection is explicitly re-armed. That is what
//! guarantees that a connection is never dispatched to two workers at once.
//!
//! # Backends
//!
//! | Backend | Platform | Module |
//! |---------|----------|--------|
//! | [`OsPoller`] | epoll / kqueue / event ports / IOCP (via `polling`) | `os.rs` |
//! | [`LabPoller`] | virtual, injected readiness | `lab.rs` |
//!
//! # Operations
//!
//! | Operation | Meaning |
//! |-----------|---------|
//! | create | [`PollerFactory`] produces a fresh poller per group |
//! | [`associate`](Poller::associate) | first registration of a handle |
//! | [`rearm_for_read`](Poller::rearm_for_read) | re-enable after a delivery |
//! | [`disassociate`](Poller::disassociate) | remove a handle |
//! | [`wait`](Poller::wait) | block (`None`), poll (`Some(ZERO)`), or bounded wait |
//! | [`wake`](Poller::wake) | interrupt a concurrent `wait` |

pub mod lab;
pub mod os;

pub use lab::{LabPoller, LabPollerFactory};
pub use os::OsPoller;

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Raw OS handle of a connection's socket.
#[cfg(unix)]
pub type RawHandle = std::os::unix::io::RawFd;

/// Raw OS handle of a connection's socket.
#[cfg(windows)]
pub type RawHandle = std::os::windows::io::RawSocket;

/// Creates a poller for a thread group.
pub type PollerFactory = Arc<dyn Fn() -> io::Result<Arc<dyn Poller>> + Send + Sync>;

/// Identifier attached to a registration and echoed back in its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub usize);

impl Token {
    /// Creates a new token.
    #[must_use]
    pub const fn new(val: usize) -> Self {
        Self(val)
    }
}

/// A readiness notification for one registered handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Token of the registration that became ready.
    pub token: Token,
    /// Whether the handle is readable.
    pub readable: bool,
}

impl Event {
    /// Creates a readable event.
    #[must_use]
    pub const fn readable(token: Token) -> Self {
        Self {
            token,
            readable: true,
        }
    }
}

/// Container for events returned by [`Poller::wait`].
///
/// Re-used across waits to avoid allocation. [`push`](Self::push) refuses
/// events beyond capacity; backends keep the surplus for the next wait.
#[derive(Debug)]
pub struct Events {
    inner: Vec<Event>,
    capacity: usize,
}

impl Events {
    /// Creates a new events buffer with the given capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Clears all events, maintaining capacity.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Pushes an event unless the buffer is full.
    pub fn push(&mut self, event: Event) -> bool {
        if self.inner.len() < self.capacity {
            self.inner.push(event);
            true
        } else {
            false
        }
    }

    /// Returns the number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if no events are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns true if no more events fit.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.inner.len() >= self.capacity
    }

    /// Returns the capacity (maximum number of events).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterates over events.
    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.inner.iter()
    }
}

impl<'a> IntoIterator for &'a Events {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A one-shot readiness notification facility.
///
/// Implementations must be usable from several threads at once: the listener
/// blocks in [`wait`](Self::wait) while other workers re-arm connections and
/// perform zero-timeout polls.
pub trait Poller: Send + Sync + fmt::Debug {
    /// Registers `handle` for read readiness, reporting `token` when ready.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is already registered or the OS rejects
    /// the registration.
    fn associate(&self, handle: RawHandle, token: Token) -> io::Result<()>;

    /// Re-enables read notification for a handle after a delivery.
    ///
    /// Must not be called before [`associate`](Self::associate).
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is not registered.
    fn rearm_for_read(&self, handle: RawHandle, token: Token) -> io::Result<()>;

    /// Removes a handle from the poller.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is not registered.
    fn disassociate(&self, handle: RawHandle) -> io::Result<()>;

    /// Waits for readiness and fills `events`, returning how many arrived.
    ///
    /// `None` blocks until an event or a [`wake`](Self::wake); `Some(ZERO)`
    /// returns immediately. Interrupted system calls are retried internally.
    /// A return of `Ok(0)` from a blocking wait means the poller was woken.
    ///
    /// # Errors
    ///
    /// Any error is fatal for the owning group.
    fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize>;

    /// Interrupts a concurrent or the next [`wait`](Self::wait).
    ///
    /// # Errors
    ///
    /// Returns an error if the notification could not be posted.
    fn wake(&self) -> io::Result<()>;

    /// Number of handles currently registered.
    fn registration_count(&self) -> usize;
}
