//! Thread groups: one poller, two priority queues, the idle-worker list and
//! the counters that drive wakeups and thread creation.
//!
//! Everything here runs under the group's state lock. Operations that must
//! spawn threads or reach other groups live on the pool and take the locked
//! [`GroupState`] as an argument.

use crate::connection::{Connection, ConnectionState, Priority};
use crate::config::ThrottlePolicy;
use crate::error::ErrorKind;
use crate::poller::{Events, Poller, Token};
use crate::stats::GroupStats;
use crate::worker::{WakeReason, WorkerId, WorkerSignal};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Two FIFO queues, high priority served first.
#[derive(Debug, Default)]
pub struct ConnectionQueues {
    queues: [VecDeque<Arc<Connection>>; 2],
}

impl ConnectionQueues {
    /// Creates empty queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `conn` to the queue for `priority`.
    pub fn push(&mut self, conn: Arc<Connection>, priority: Priority) {
        self.queues[priority.index()].push_back(conn);
    }

    /// Stamps `conn` with the enqueue time `now` (pool-clock microseconds)
    /// and appends it to the queue for `priority`.
    pub fn push_at(&mut self, conn: Arc<Connection>, priority: Priority, now: u64) {
        conn.sched.lock().dequeue_time = now;
        self.push(conn, priority);
    }

    /// Pops the oldest high-priority connection, else the oldest low one.
    pub fn pop(&mut self) -> Option<Arc<Connection>> {
        self.queues.iter_mut().find_map(VecDeque::pop_front)
    }

    /// True if both queues are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    /// Total queued connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    /// Connections queued at `priority`.
    #[must_use]
    pub fn len_of(&self, priority: Priority) -> usize {
        self.queues[priority.index()].len()
    }

    /// Moves low-priority connections queued for longer than `kickup`
    /// microseconds to the back of the high queue.
    ///
    /// The low queue is FIFO, so promotion stops at the first young entry.
    /// Returns how many were promoted.
    pub fn promote_aged(&mut self, now: u64, kickup: u64) -> usize {
        let mut promoted = 0;
        loop {
            let aged = self.queues[Priority::Low.index()]
                .front()
                .is_some_and(|c| now.saturating_sub(c.sched.lock().dequeue_time) > kickup);
            if !aged {
                break;
            }
            if let Some(conn) = self.queues[Priority::Low.index()].pop_front() {
                self.queues[Priority::High.index()].push_back(conn);
                promoted += 1;
            }
        }
        promoted
    }

    /// Removes and returns every queued connection.
    pub fn drain(&mut self) -> Vec<Arc<Connection>> {
        self.queues.iter_mut().flat_map(|q| q.drain(..)).collect()
    }
}

/// Hands out poller tokens for one group.
///
/// Released tokens are reused before new ones are minted, so the largest
/// token stays below the number of simultaneous registrations and never
/// reaches `usize::MAX`, which the OS poller reserves for its own wakeups.
#[derive(Debug, Default)]
pub(crate) struct TokenSlab {
    next: usize,
    free: Vec<usize>,
}

impl TokenSlab {
    pub(crate) fn allocate(&mut self) -> Token {
        if let Some(token) = self.free.pop() {
            return Token(token);
        }
        let token = self.next;
        self.next += 1;
        Token(token)
    }

    pub(crate) fn release(&mut self, token: Token) {
        debug_assert!(token.0 < self.next && !self.free.contains(&token.0));
        self.free.push(token.0);
    }

    /// Tokens currently handed out.
    pub(crate) fn in_use(&self) -> usize {
        self.next - self.free.len()
    }
}

/// Result of a wake-or-create request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOutcome {
    /// An idle worker was signalled.
    Woken,
    /// A new worker was started.
    Created,
    /// The group already has more threads than connections.
    NotNeeded,
    /// Creation was deferred by the throttle.
    Throttled,
    /// Creation failed; the pool is blocked.
    Blocked(ErrorKind),
    /// The group is shutting down.
    Shutdown,
}

/// Decision taken once no idle worker could be woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationDecision {
    /// Start a worker now.
    Create,
    /// More threads than connections; nothing to do.
    NotNeeded,
    /// Too soon after the previous creation.
    Throttled,
}

/// Decides whether a group without idle workers should get a new one.
///
/// A group whose active count is zero always gets a thread immediately:
/// nobody else could drain its queue.
#[must_use]
pub fn creation_decision(
    thread_count: usize,
    active_thread_count: usize,
    connection_count: usize,
    last_creation: Option<Instant>,
    throttle: &ThrottlePolicy,
    now: Instant,
) -> CreationDecision {
    if thread_count > connection_count {
        return CreationDecision::NotNeeded;
    }
    if active_thread_count == 0 {
        return CreationDecision::Create;
    }
    let interval = throttle.interval_for(thread_count);
    let elapsed = last_creation.map_or(Duration::MAX, |t| now.saturating_duration_since(t));
    if interval.is_zero() || elapsed > interval {
        CreationDecision::Create
    } else {
        CreationDecision::Throttled
    }
}

/// Lifetime counters of a group.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct GroupCounters {
    pub(crate) threads_created: u64,
    pub(crate) stalls_detected: u64,
    pub(crate) events_dispatched: u64,
}

/// Mutable state of a thread group.
#[derive(Debug, Default)]
pub(crate) struct GroupState {
    pub(crate) queues: ConnectionQueues,
    /// Front is the most recently parked worker.
    pub(crate) idle: VecDeque<Arc<WorkerSignal>>,
    pub(crate) listener: Option<WorkerId>,
    pub(crate) poller: Option<Arc<dyn Poller>>,
    pub(crate) armed: HashMap<Token, Arc<Connection>>,
    pub(crate) tokens: TokenSlab,
    pub(crate) thread_count: usize,
    pub(crate) active_thread_count: usize,
    pub(crate) connection_count: usize,
    pub(crate) io_event_count: u64,
    pub(crate) queue_event_count: u64,
    pub(crate) last_thread_creation: Option<Instant>,
    pub(crate) shutdown: bool,
    pub(crate) stalled: bool,
    pub(crate) destroyed: bool,
    pub(crate) reported: bool,
    pub(crate) counters: GroupCounters,
}

impl GroupState {
    /// Pops the next connection and counts the dequeue attempt.
    pub(crate) fn queue_get(&mut self) -> Option<Arc<Connection>> {
        self.queue_event_count += 1;
        let conn = self.queues.pop()?;
        conn.sched.lock().state = ConnectionState::Dispatched;
        self.counters.events_dispatched += 1;
        Some(conn)
    }

    /// Queues one connection stamped with `now`.
    pub(crate) fn queue_put(&mut self, conn: Arc<Connection>, now: u64) {
        let priority = {
            let mut sched = conn.sched.lock();
            sched.state = ConnectionState::Queued;
            sched.priority
        };
        self.queues.push_at(conn, priority, now);
    }

    /// Queues the connections behind `events`.
    ///
    /// Tokens without an armed connection (already closed or migrated) are
    /// skipped. Returns the number queued.
    pub(crate) fn queue_put_events(&mut self, events: &Events, now: u64) -> usize {
        let mut queued = 0;
        for event in events {
            if let Some(conn) = self.armed.remove(&event.token) {
                self.queue_put(conn, now);
                queued += 1;
            } else {
                tracing::trace!(token = event.token.0, "event for unknown token dropped");
            }
        }
        queued
    }

    /// True when this group already runs enough concurrent workers.
    pub(crate) fn too_many_threads(&self, oversubscribe: usize) -> bool {
        self.active_thread_count >= 1 + oversubscribe && !self.stalled
    }

    /// Signals the most recently parked worker.
    pub(crate) fn wake_thread(&mut self) -> bool {
        self.wake_thread_with(WakeReason::Signalled)
    }

    pub(crate) fn wake_thread_with(&mut self, reason: WakeReason) -> bool {
        match self.idle.pop_front() {
            Some(worker) => {
                worker.signal(reason);
                true
            }
            None => false,
        }
    }

    /// Workers start and end in the active state.
    pub(crate) fn add_thread(&mut self) {
        self.thread_count += 1;
        self.active_thread_count += 1;
    }

    pub(crate) fn remove_thread(&mut self) {
        debug_assert!(self.thread_count > 0 && self.active_thread_count > 0);
        self.thread_count = self.thread_count.saturating_sub(1);
        self.active_thread_count = self.active_thread_count.saturating_sub(1);
    }

    pub(crate) fn deactivate(&mut self) {
        debug_assert!(self.active_thread_count > 0);
        self.active_thread_count = self.active_thread_count.saturating_sub(1);
    }

    pub(crate) fn activate(&mut self) {
        self.active_thread_count += 1;
        debug_assert!(self.active_thread_count <= self.thread_count);
    }

    pub(crate) fn snapshot(&self, index: usize) -> GroupStats {
        GroupStats {
            index,
            initialized: self.poller.is_some(),
            thread_count: self.thread_count,
            active_thread_count: self.active_thread_count,
            idle_thread_count: self.idle.len(),
            connection_count: self.connection_count,
            queued_high: self.queues.len_of(Priority::High),
            queued_low: self.queues.len_of(Priority::Low),
            armed: self.armed.len(),
            registered: self.tokens.in_use(),
            has_listener: self.listener.is_some(),
            stalled: self.stalled,
            shutdown: self.shutdown,
            destroyed: self.destroyed,
            threads_created: self.counters.threads_created,
            stalls_detected: self.counters.stalls_detected,
            events_dispatched: self.counters.events_dispatched,
        }
    }
}

/// A partition of connections and workers.
#[derive(Debug)]
pub(crate) struct ThreadGroup {
    pub(crate) index: usize,
    pub(crate) state: Mutex<GroupState>,
}

impl ThreadGroup {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            state: Mutex::new(GroupState::default()),
        }
    }
}
