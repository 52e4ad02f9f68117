//! OS readiness poller built on the `polling` crate.
//!
//! `polling` maps to epoll on Linux/Android, kqueue on macOS and the BSDs,
//! event ports on illumos/Solaris and IOCP (via wepoll) on Windows. Its
//! default registration mode is one-shot: a handle that fired stays silent
//! until [`Poller::rearm_for_read`] modifies it again.
//!
//! # Concurrent waits
//!
//! `polling` lets a single thread block in `wait` at a time; a second waiter
//! returns `Ok(0)` immediately. The pool relies on that: the listener blocks
//! with an infinite timeout while other workers only ever perform
//! zero-timeout polls, which then simply report nothing.
//!
//! `polling` sizes its own event buffer, so a wait may report more events
//! than the caller's [`Events`] holds. The surplus is kept and handed out
//! first by the next wait; dropping it would lose the one-shot delivery.

use super::{Event, Events, Poller, RawHandle, Token};
use parking_lot::Mutex;
use polling::Event as PollEvent;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Readiness poller backed by the platform facility.
pub struct OsPoller {
    poller: polling::Poller,
    registrations: AtomicUsize,
    overflow: Mutex<VecDeque<Event>>,
}

impl OsPoller {
    /// Creates a new OS poller.
    ///
    /// # Errors
    ///
    /// Returns an error if the facility cannot be created (for example when
    /// the process is out of file descriptors).
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poller: polling::Poller::new()?,
            registrations: AtomicUsize::new(0),
            overflow: Mutex::new(VecDeque::new()),
        })
    }

    /// Returns a factory producing shared OS pollers.
    #[must_use]
    pub fn factory() -> super::PollerFactory {
        Arc::new(|| Ok(Arc::new(Self::new()?) as Arc<dyn Poller>))
    }
}

impl Poller for OsPoller {
    fn associate(&self, handle: RawHandle, token: Token) -> io::Result<()> {
        self.poller.add(handle, PollEvent::readable(token.0))?;
        self.registrations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn rearm_for_read(&self, handle: RawHandle, token: Token) -> io::Result<()> {
        self.poller.modify(handle, PollEvent::readable(token.0))
    }

    fn disassociate(&self, handle: RawHandle) -> io::Result<()> {
        self.poller.delete(handle)?;
        self.registrations.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        events.clear();
        take_deferred(&mut self.overflow.lock(), events);
        if !events.is_empty() {
            return Ok(events.len());
        }

        let mut raw: Vec<PollEvent> = Vec::with_capacity(events.capacity());
        loop {
            match self.poller.wait(&mut raw, timeout) {
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    raw.clear();
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        for ev in &raw {
            let event = Event {
                token: Token(ev.key),
                readable: ev.readable,
            };
            if !events.push(event) {
                tracing::trace!(key = ev.key, "event buffer full, event deferred");
                self.overflow.lock().push_back(event);
            }
        }
        Ok(events.len())
    }

    fn wake(&self) -> io::Result<()> {
        self.poller.notify()
    }

    fn registration_count(&self) -> usize {
        self.registrations.load(Ordering::Relaxed)
    }
}

/// Moves deferred events into `events` oldest first.
fn take_deferred(overflow: &mut VecDeque<Event>, events: &mut Events) {
    while !events.is_full() {
        let Some(ev) = overflow.pop_front() else { break };
        events.push(ev);
    }
}

impl std::fmt::Debug for OsPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OsPoller")
            .field("registration_count", &self.registration_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod deferred_tests {
    use super::*;

    #[test]
    fn deferred_events_are_handed_out_in_arrival_order() {
        let mut overflow: VecDeque<Event> = (1..=3).map(|t| Event::readable(Token(t))).collect();
        let mut events = Events::with_capacity(2);

        take_deferred(&mut overflow, &mut events);
        let tokens: Vec<usize> = events.iter().map(|e| e.token.0).collect();
        assert_eq!(tokens, vec![1, 2]);
        assert_eq!(overflow.len(), 1);

        events.clear();
        take_deferred(&mut overflow, &mut events);
        let tokens: Vec<usize> = events.iter().map(|e| e.token.0).collect();
        assert_eq!(tokens, vec![3]);
        assert!(overflow.is_empty());
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn create_poller() {
        let poller = OsPoller::new().expect("failed to create poller");
        assert_eq!(poller.registration_count(), 0);
    }

    #[test]
    fn zero_timeout_poll_returns_immediately() {
        let poller = OsPoller::new().expect("failed to create poller");
        let mut events = Events::with_capacity(8);
        let n = poller
            .wait(&mut events, Some(Duration::ZERO))
            .expect("wait failed");
        assert_eq!(n, 0);
    }

    #[test]
    fn readable_event_is_one_shot() {
        let poller = OsPoller::new().expect("failed to create poller");
        let (a, mut b) = UnixStream::pair().expect("socket pair");
        let token = Token::new(7);

        poller.associate(a.as_raw_fd(), token).expect("associate");
        assert_eq!(poller.registration_count(), 1);

        b.write_all(b"x").expect("write");
        let mut events = Events::with_capacity(8);
        let n = poller
            .wait(&mut events, Some(Duration::from_secs(1)))
            .expect("wait");
        assert_eq!(n, 1);
        assert_eq!(events.iter().next().map(|e| e.token), Some(token));

        // Data is still unread, but the registration is disarmed.
        let n = poller
            .wait(&mut events, Some(Duration::from_millis(20)))
            .expect("wait");
        assert_eq!(n, 0);

        // Re-arming reports the pending data again.
        poller.rearm_for_read(a.as_raw_fd(), token).expect("rearm");
        let n = poller
            .wait(&mut events, Some(Duration::from_secs(1)))
            .expect("wait");
        assert_eq!(n, 1);

        poller.disassociate(a.as_raw_fd()).expect("disassociate");
        assert_eq!(poller.registration_count(), 0);
    }

    #[test]
    fn wake_interrupts_blocking_wait() {
        let poller = Arc::new(OsPoller::new().expect("failed to create poller"));
        let waiter = {
            let poller = Arc::clone(&poller);
            std::thread::spawn(move || {
                let mut events = Events::with_capacity(8);
                poller.wait(&mut events, None)
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        poller.wake().expect("wake");
        let n = waiter.join().expect("waiter panicked").expect("wait");
        assert_eq!(n, 0);
    }

    #[test]
    fn surplus_events_are_delivered_once_each() {
        let poller = OsPoller::new().expect("failed to create poller");
        let pairs: Vec<_> = (0..3).map(|_| UnixStream::pair().expect("socket pair")).collect();
        for (i, (a, b)) in pairs.iter().enumerate() {
            poller.associate(a.as_raw_fd(), Token::new(i)).expect("associate");
            (&*b).write_all(b"x").expect("write");
        }

        let mut events = Events::with_capacity(1);
        let mut seen = Vec::new();
        for _ in 0..3 {
            let n = poller
                .wait(&mut events, Some(Duration::from_secs(1)))
                .expect("wait");
            assert_eq!(n, 1);
            seen.extend(events.iter().map(|e| e.token.0));
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);

        let n = poller
            .wait(&mut events, Some(Duration::from_millis(20)))
            .expect("wait");
        assert_eq!(n, 0);
    }
}
