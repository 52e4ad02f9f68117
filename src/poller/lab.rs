//! Deterministic lab poller for testing.
//!
//! [`LabPoller`] implements the one-shot [`Poller`] contract without touching
//! the OS. Handles are plain integers; test code marks them readable with
//! [`LabPoller::inject_ready`].
//!
//! # Readiness model
//!
//! Each registration carries two flags:
//!
//! - `armed`: the handle may be reported.
//! - `ready`: data is waiting.
//!
//! When both are set an event is queued and both flags are cleared, exactly
//! like an edge-triggered one-shot registration. Readiness that arrives while
//! disarmed is remembered and reported as soon as the handle is re-armed.
//!
//! # Fault injection
//!
//! [`LabPoller::fail_next_wait`] makes the next `wait` return an error, which
//! lets tests exercise the poller-fatal path of a thread group.
//!
//! # Example
//!
//! ```ignore
//! let poller = LabPoller::new();
//! poller.associate(10, Token::new(1))?;
//! poller.inject_ready(10);
//!
//! let mut events = Events::with_capacity(8);
//! assert_eq!(poller.wait(&mut events, Some(Duration::ZERO))?, 1);
//! ```

use super::{Event, Events, Poller, PollerFactory, RawHandle, Token};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct LabRegistration {
    token: Token,
    armed: bool,
    ready: bool,
}

#[derive(Debug, Default)]
struct LabState {
    registrations: HashMap<RawHandle, LabRegistration>,
    pending: VecDeque<Event>,
    notified: bool,
    fail_next_wait: Option<io::ErrorKind>,
}

impl LabState {
    fn deliver(&mut self, handle: RawHandle) -> bool {
        let Some(reg) = self.registrations.get_mut(&handle) else {
            return false;
        };
        if reg.armed && reg.ready {
            reg.armed = false;
            reg.ready = false;
            let token = reg.token;
            self.pending.push_back(Event::readable(token));
            return true;
        }
        false
    }
}

/// Virtual one-shot poller with injected readiness.
#[derive(Debug, Default)]
pub struct LabPoller {
    state: Mutex<LabState>,
    cond: Condvar,
    waits: AtomicUsize,
}

impl LabPoller {
    /// Creates an empty lab poller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `handle` readable.
    ///
    /// Returns `true` if the handle is registered with this poller. The event
    /// is delivered now if the handle is armed, or on its next re-arm.
    pub fn inject_ready(&self, handle: RawHandle) -> bool {
        let mut state = self.state.lock();
        let Some(reg) = state.registrations.get_mut(&handle) else {
            return false;
        };
        reg.ready = true;
        if state.deliver(handle) {
            self.cond.notify_all();
        }
        true
    }

    /// Makes the next [`Poller::wait`] call fail with `kind`.
    pub fn fail_next_wait(&self, kind: io::ErrorKind) {
        let mut state = self.state.lock();
        state.fail_next_wait = Some(kind);
        self.cond.notify_all();
    }

    /// Returns true if `handle` is registered and armed.
    #[must_use]
    pub fn is_armed(&self, handle: RawHandle) -> bool {
        self.state
            .lock()
            .registrations
            .get(&handle)
            .is_some_and(|reg| reg.armed)
    }

    /// Returns true if `handle` is registered with this poller.
    #[must_use]
    pub fn is_registered(&self, handle: RawHandle) -> bool {
        self.state.lock().registrations.contains_key(&handle)
    }

    /// Token `handle` was registered with.
    #[must_use]
    pub fn token_of(&self, handle: RawHandle) -> Option<Token> {
        self.state
            .lock()
            .registrations
            .get(&handle)
            .map(|reg| reg.token)
    }

    /// Number of events waiting to be collected.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of `wait` calls served so far.
    #[must_use]
    pub fn wait_calls(&self) -> usize {
        self.waits.load(Ordering::Relaxed)
    }
}

impl Poller for LabPoller {
    fn associate(&self, handle: RawHandle, token: Token) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.registrations.contains_key(&handle) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "handle already registered",
            ));
        }
        state.registrations.insert(
            handle,
            LabRegistration {
                token,
                armed: true,
                ready: false,
            },
        );
        Ok(())
    }

    fn rearm_for_read(&self, handle: RawHandle, token: Token) -> io::Result<()> {
        let mut state = self.state.lock();
        let reg = state
            .registrations
            .get_mut(&handle)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "handle not registered"))?;
        reg.token = token;
        reg.armed = true;
        if state.deliver(handle) {
            self.cond.notify_all();
        }
        Ok(())
    }

    fn disassociate(&self, handle: RawHandle) -> io::Result<()> {
        let mut state = self.state.lock();
        let reg = state
            .registrations
            .remove(&handle)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "handle not registered"))?;
        state.pending.retain(|ev| ev.token != reg.token);
        Ok(())
    }

    fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        events.clear();
        self.waits.fetch_add(1, Ordering::Relaxed);
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if let Some(kind) = state.fail_next_wait.take() {
                return Err(io::Error::new(kind, "injected wait failure"));
            }
            if !state.pending.is_empty() {
                while !events.is_full() {
                    let Some(ev) = state.pending.pop_front() else {
                        break;
                    };
                    events.push(ev);
                }
                return Ok(events.len());
            }
            if state.notified {
                state.notified = false;
                return Ok(0);
            }
            match deadline {
                None => self.cond.wait(&mut state),
                Some(deadline) => {
                    if Instant::now() >= deadline
                        || self.cond.wait_until(&mut state, deadline).timed_out()
                    {
                        if state.pending.is_empty() && state.fail_next_wait.is_none() {
                            return Ok(0);
                        }
                    }
                }
            }
        }
    }

    fn wake(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        state.notified = true;
        self.cond.notify_all();
        Ok(())
    }

    fn registration_count(&self) -> usize {
        self.state.lock().registrations.len()
    }
}

/// Factory that hands out [`LabPoller`]s and remembers them.
///
/// Tests use it to inject readiness without knowing which group currently
/// owns a handle.
#[derive(Debug, Default)]
pub struct LabPollerFactory {
    pollers: Mutex<Vec<Arc<LabPoller>>>,
    fail_create: AtomicBool,
}

impl LabPollerFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a [`PollerFactory`] that records every poller it creates.
    #[must_use]
    pub fn factory(self: &Arc<Self>) -> PollerFactory {
        let this = Arc::clone(self);
        Arc::new(move || {
            if this.fail_create.load(Ordering::Acquire) {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "injected poller creation failure",
                ));
            }
            let poller = Arc::new(LabPoller::new());
            this.pollers.lock().push(Arc::clone(&poller));
            Ok(poller as Arc<dyn Poller>)
        })
    }

    /// Makes subsequent creations fail (or succeed again).
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::Release);
    }

    /// Marks `handle` readable on whichever poller holds it.
    ///
    /// Returns `true` if some poller has the handle registered.
    pub fn inject_ready(&self, handle: RawHandle) -> bool {
        let pollers = self.pollers.lock().clone();
        pollers.iter().any(|p| p.inject_ready(handle))
    }

    /// Returns true if some poller has `handle` registered and armed.
    #[must_use]
    pub fn is_armed(&self, handle: RawHandle) -> bool {
        self.pollers.lock().iter().any(|p| p.is_armed(handle))
    }

    /// All pollers created so far, in creation order.
    #[must_use]
    pub fn pollers(&self) -> Vec<Arc<LabPoller>> {
        self.pollers.lock().clone()
    }

    /// Number of pollers created so far.
    #[must_use]
    pub fn created(&self) -> usize {
        self.pollers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn wait_now(poller: &LabPoller) -> Vec<Token> {
        let mut events = Events::with_capacity(16);
        poller
            .wait(&mut events, Some(Duration::ZERO))
            .expect("wait failed");
        events.iter().map(|e| e.token).collect()
    }

    #[test]
    fn ready_while_armed_is_delivered_once() {
        let poller = LabPoller::new();
        poller.associate(3, Token::new(30)).expect("associate");
        assert!(poller.inject_ready(3));
        assert!(!poller.is_armed(3));

        assert_eq!(wait_now(&poller), vec![Token::new(30)]);
        assert!(wait_now(&poller).is_empty());

        // Disarmed: readiness is remembered, not delivered.
        assert!(poller.inject_ready(3));
        assert!(wait_now(&poller).is_empty());

        poller.rearm_for_read(3, Token::new(30)).expect("rearm");
        assert_eq!(wait_now(&poller), vec![Token::new(30)]);
    }

    #[test]
    fn unknown_handle_is_rejected() {
        let poller = LabPoller::new();
        assert!(!poller.inject_ready(99));
        let err = poller
            .rearm_for_read(99, Token::new(1))
            .expect_err("rearm before associate");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        let err = poller.disassociate(99).expect_err("not registered");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn double_associate_fails() {
        let poller = LabPoller::new();
        poller.associate(1, Token::new(1)).expect("associate");
        let err = poller
            .associate(1, Token::new(1))
            .expect_err("second associate");
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(poller.registration_count(), 1);
    }

    #[test]
    fn disassociate_drops_pending_event() {
        let poller = LabPoller::new();
        poller.associate(4, Token::new(4)).expect("associate");
        poller.inject_ready(4);
        assert_eq!(poller.pending_events(), 1);
        poller.disassociate(4).expect("disassociate");
        assert_eq!(poller.pending_events(), 0);
        assert!(wait_now(&poller).is_empty());
    }

    #[test]
    fn blocking_wait_wakes_on_injection() {
        let poller = Arc::new(LabPoller::new());
        poller.associate(5, Token::new(50)).expect("associate");
        let waiter = {
            let poller = Arc::clone(&poller);
            thread::spawn(move || {
                let mut events = Events::with_capacity(4);
                let n = poller.wait(&mut events, None).expect("wait");
                (n, events.iter().map(|e| e.token).collect::<Vec<_>>())
            })
        };
        thread::sleep(Duration::from_millis(10));
        poller.inject_ready(5);
        let (n, tokens) = waiter.join().expect("waiter panicked");
        assert_eq!(n, 1);
        assert_eq!(tokens, vec![Token::new(50)]);
    }

    #[test]
    fn wake_returns_zero_events() {
        let poller = Arc::new(LabPoller::new());
        let waiter = {
            let poller = Arc::clone(&poller);
            thread::spawn(move || {
                let mut events = Events::with_capacity(4);
                poller.wait(&mut events, None).expect("wait")
            })
        };
        thread::sleep(Duration::from_millis(10));
        poller.wake().expect("wake");
        assert_eq!(waiter.join().expect("waiter panicked"), 0);
    }

    #[test]
    fn bounded_wait_times_out() {
        let poller = LabPoller::new();
        let mut events = Events::with_capacity(4);
        let start = Instant::now();
        let n = poller
            .wait(&mut events, Some(Duration::from_millis(20)))
            .expect("wait");
        assert_eq!(n, 0);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn injected_failure_is_reported_once() {
        let poller = LabPoller::new();
        poller.fail_next_wait(io::ErrorKind::Other);
        let mut events = Events::with_capacity(4);
        assert!(poller.wait(&mut events, Some(Duration::ZERO)).is_err());
        assert_eq!(
            poller
                .wait(&mut events, Some(Duration::ZERO))
                .expect("second wait"),
            0
        );
    }

    #[test]
    fn factory_routes_injection_to_owner() {
        let lab = LabPollerFactory::new();
        let factory = lab.factory();
        let a = factory().expect("create a");
        let b = factory().expect("create b");
        a.associate(1, Token::new(1)).expect("associate a");
        b.associate(2, Token::new(2)).expect("associate b");

        assert!(lab.inject_ready(2));
        assert!(!lab.inject_ready(3));
        assert_eq!(lab.created(), 2);
        assert_eq!(lab.pollers()[1].pending_events(), 1);
        assert_eq!(lab.pollers()[0].pending_events(), 0);

        lab.set_fail_create(true);
        assert!(factory().is_err());
        assert_eq!(lab.created(), 2);
    }
}
