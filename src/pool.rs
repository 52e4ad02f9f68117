//! The thread-group pool.
//!
//! A [`Pool`] owns a fixed-capacity array of thread groups, the stall timer
//! and a registry of live connections. Connections are assigned to groups by
//! `id % group_count`; each group runs its own workers, its own poller and
//! its own queues, so the hot path never takes a pool-wide lock.
//!
//! # Lifecycle
//!
//! ```text
//! Pool::new ──► add(conn) ──► group queue ──► worker ──► handler
//!                                 ▲                         │
//!                                 └──── poller ◄── start_io ┘
//! ```
//!
//! [`Pool::shutdown`] stops the timer, marks every group shut down and wakes
//! its listener and idle workers. A group is destroyed when its last worker
//! exits; once every group has been destroyed the array is released and
//! `shutdown` returns.
//!
//! # Lock order
//!
//! registry → group state → connection scheduling record. The release lock
//! may be taken under a group lock but never the other way around.

use crate::builder::PoolBuilder;
use crate::config::{validate_stall_limit, PoolConfig};
use crate::connection::{
    Connection, ConnectionId, ConnectionSched, ConnectionState, Priority, NO_DEADLINE,
};
use crate::diagnostics::BlockedReporter;
use crate::dispatch::{Dispatch, EventHandler};
use crate::error::{Error, ErrorKind, Result};
use crate::group::{creation_decision, CreationDecision, GroupState, ThreadGroup, WakeOutcome};
use crate::stats::{GroupStats, PoolStats};
use crate::timer::{timer_main, PoolTimer};
use crate::worker::{worker_main, WakeReason, WorkerId, WorkerSignal};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct ReleaseState {
    released: bool,
    releases: u64,
}

/// State shared by the pool handle, the workers and the timer.
pub(crate) struct PoolShared {
    pub(crate) config: PoolConfig,
    handler: Arc<dyn EventHandler>,
    pub(crate) groups: Box<[ThreadGroup]>,
    group_count: AtomicUsize,
    pub(crate) timer: PoolTimer,
    total_threads: AtomicUsize,
    blocked: BlockedReporter,
    registry: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
    /// Groups not yet destroyed during shutdown.
    live_groups: AtomicUsize,
    shutdown_started: AtomicBool,
    closing: AtomicBool,
    release: Mutex<ReleaseState>,
    release_cond: Condvar,
    next_worker_id: AtomicU64,
    timeouts_fired: AtomicU64,
}

impl PoolShared {
    fn new(config: PoolConfig, handler: Arc<dyn EventHandler>) -> Self {
        let groups: Box<[ThreadGroup]> = (0..config.max_groups).map(ThreadGroup::new).collect();
        Self {
            timer: PoolTimer::new(config.stall_limit),
            blocked: BlockedReporter::new(config.blocked_message_delay),
            config,
            handler,
            groups,
            group_count: AtomicUsize::new(0),
            total_threads: AtomicUsize::new(0),
            registry: Mutex::new(HashMap::new()),
            live_groups: AtomicUsize::new(0),
            shutdown_started: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            release: Mutex::new(ReleaseState::default()),
            release_cond: Condvar::new(),
            next_worker_id: AtomicU64::new(1),
            timeouts_fired: AtomicU64::new(0),
        }
    }

    pub(crate) fn group_count(&self) -> usize {
        self.group_count.load(Ordering::Acquire)
    }

    /// Creates pollers for groups `0..size` and publishes the new count.
    ///
    /// On a poller failure at group `i > 0` the count is cut to `i`.
    fn resize(&self, size: usize) -> Result<()> {
        for idx in 0..size {
            let mut st = self.groups[idx].state.lock();
            if st.poller.is_some() || st.destroyed {
                continue;
            }
            match (self.config.poller_factory)() {
                Ok(poller) => {
                    st.poller = Some(poller);
                    tracing::trace!(group = idx, "group initialized");
                }
                Err(err) => {
                    tracing::error!(group = idx, error = %err, "failed to create group poller");
                    if idx > 0 {
                        self.group_count.store(idx, Ordering::Release);
                    }
                    return Err(Error::poller(ErrorKind::PollerCreate, err)
                        .with_message(format!("group {idx}")));
                }
            }
        }
        let old = self.group_count.swap(size, Ordering::AcqRel);
        if old != size {
            tracing::info!(from = old, to = size, "thread group count changed");
        }
        Ok(())
    }

    /// Runs the handler for one dispatched connection, then re-arms or
    /// closes it.
    pub(crate) fn dispatch(self: &Arc<Self>, conn: Arc<Connection>) {
        let mut dispatch = Dispatch::new(self, &conn);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handler.handle(&mut dispatch)));
        let rearm = dispatch.finish();

        if let Err(payload) = outcome {
            tracing::warn!(
                connection = %conn.id(),
                panic = panic_message(&*payload),
                "handler panicked, closing connection"
            );
            self.close_connection(&conn);
            return;
        }
        if !rearm {
            self.close_connection(&conn);
            return;
        }
        if let Err(err) = self.start_io(&conn) {
            tracing::debug!(connection = %conn.id(), error = %err, "re-arm failed, closing connection");
            self.close_connection(&conn);
        }
    }

    /// Registers `conn` with its group's poller for the next read event,
    /// migrating it first if the group count changed since it was assigned.
    fn start_io(self: &Arc<Self>, conn: &Arc<Connection>) -> Result<()> {
        let target = conn.id().group_index(self.group_count());
        let current = conn.group();
        if target != current {
            self.change_group(conn, current, target)?;
        }

        let mut st = self.groups[target].state.lock();
        if st.shutdown {
            return Err(Error::group_shutdown(target));
        }
        let Some(poller) = st.poller.clone() else {
            return Err(Error::new(ErrorKind::InvalidState)
                .with_message(format!("group {target} has no poller")));
        };

        let mut sched = conn.sched.lock();
        let (token, fresh) = match sched.token {
            Some(token) => (token, false),
            None => (st.tokens.allocate(), true),
        };
        // Visible to the listener before the handle can fire.
        st.armed.insert(token, Arc::clone(conn));
        sched.state = ConnectionState::Armed;
        let registered = if fresh {
            poller.associate(conn.handle(), token)
        } else {
            poller.rearm_for_read(conn.handle(), token)
        };
        match registered {
            Ok(()) => {
                sched.token = Some(token);
                Ok(())
            }
            Err(err) => {
                st.armed.remove(&token);
                if fresh {
                    st.tokens.release(token);
                }
                sched.state = ConnectionState::Dispatched;
                Err(Error::poller(ErrorKind::PollerRegister, err)
                    .with_message(format!("{} in group {target}", conn.id())))
            }
        }
    }

    /// Moves a connection between groups.
    ///
    /// The handle is removed from the old poller; the next `start_io`
    /// associates it with the new one.
    fn change_group(self: &Arc<Self>, conn: &Arc<Connection>, from: usize, to: usize) -> Result<()> {
        {
            let mut st = self.groups[from].state.lock();
            unbind(from, &mut st, &mut conn.sched.lock(), conn);
            st.connection_count = st.connection_count.saturating_sub(1);
        }

        let mut st = self.groups[to].state.lock();
        conn.sched.lock().group = to;
        st.connection_count += 1;
        if st.shutdown {
            return Err(Error::group_shutdown(to));
        }
        if st.thread_count == 0 {
            if let Err(err) = self.create_worker(to, &mut st) {
                tracing::debug!(group = to, error = %err, "no worker for migrated connection");
            }
        }
        tracing::debug!(connection = %conn.id(), from, to, "connection migrated");
        Ok(())
    }

    /// Releases a connection. Idempotent.
    fn close_connection(&self, conn: &Arc<Connection>) {
        let group = conn.group();
        {
            let mut st = self.groups[group].state.lock();
            {
                let mut sched = conn.sched.lock();
                if sched.state == ConnectionState::Closed {
                    return;
                }
                unbind(group, &mut st, &mut sched, conn);
                sched.state = ConnectionState::Closed;
                sched.abs_wait_timeout = NO_DEADLINE;
            }
            st.connection_count = st.connection_count.saturating_sub(1);
        }
        self.registry.lock().remove(&conn.id());
        tracing::trace!(connection = %conn.id(), group, "connection closed");

        let handler = &self.handler;
        if panic::catch_unwind(AssertUnwindSafe(|| handler.on_close(conn))).is_err() {
            tracing::warn!(connection = %conn.id(), "on_close panicked");
        }
    }

    pub(crate) fn wait_begin(self: &Arc<Self>, group: usize) {
        let mut st = self.groups[group].state.lock();
        st.deactivate();
        if st.active_thread_count == 0 && (!st.queues.is_empty() || st.listener.is_none()) {
            let outcome = self.wake_or_create(group, &mut st);
            tracing::trace!(group, ?outcome, "wait_begin with no active worker");
        }
    }

    pub(crate) fn wait_end(&self, group: usize) {
        self.groups[group].state.lock().activate();
    }

    /// Wakes an idle worker, or starts one if the throttle allows.
    pub(crate) fn wake_or_create(self: &Arc<Self>, group: usize, st: &mut GroupState) -> WakeOutcome {
        if st.shutdown {
            return WakeOutcome::Shutdown;
        }
        if st.wake_thread() {
            return WakeOutcome::Woken;
        }
        let decision = creation_decision(
            st.thread_count,
            st.active_thread_count,
            st.connection_count,
            st.last_thread_creation,
            &self.config.throttle,
            Instant::now(),
        );
        match decision {
            CreationDecision::NotNeeded => WakeOutcome::NotNeeded,
            CreationDecision::Throttled => WakeOutcome::Throttled,
            CreationDecision::Create => match self.create_worker(group, st) {
                Ok(()) => WakeOutcome::Created,
                Err(err) if err.is_shutdown() => WakeOutcome::Shutdown,
                Err(err) => WakeOutcome::Blocked(err.kind()),
            },
        }
    }

    /// Spawns a worker for `group`. The caller holds the group lock, so the
    /// new thread blocks on it until the caller is done.
    pub(crate) fn create_worker(self: &Arc<Self>, group: usize, st: &mut GroupState) -> Result<()> {
        if st.shutdown {
            return Err(Error::group_shutdown(group));
        }
        let now = Instant::now();
        let max_threads = self.config.max_threads;
        // A group may always reach two threads: a listener plus one worker.
        let below_floor = st.thread_count < 2;
        let reserved = self
            .total_threads
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max_threads || below_floor).then_some(n + 1)
            });
        if reserved.is_err() {
            self.blocked.record_failure(ErrorKind::MaxThreadsReached, now);
            return Err(Error::new(ErrorKind::MaxThreadsReached)
                .with_message(format!("{max_threads} threads running")));
        }

        let id = WorkerId(self.next_worker_id.fetch_add(1, Ordering::Relaxed));
        let signal = Arc::new(WorkerSignal::new(id));
        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("{}-{group}-{}", self.config.thread_name_prefix, id.0))
            .stack_size(self.config.thread_stack_size)
            .spawn(move || worker_main(shared, group, signal));

        match spawned {
            Ok(_detached) => {
                st.add_thread();
                st.last_thread_creation = Some(now);
                st.counters.threads_created += 1;
                self.blocked.record_success();
                tracing::trace!(group, worker = %id, threads = st.thread_count, "worker created");
                Ok(())
            }
            Err(err) => {
                self.total_threads.fetch_sub(1, Ordering::AcqRel);
                self.blocked.record_failure(ErrorKind::ThreadSpawn, now);
                Err(Error::new(ErrorKind::ThreadSpawn).with_source(err))
            }
        }
    }

    /// Puts a group whose poller failed into shutdown.
    ///
    /// Errors that are not fatal for a group are logged and ignored.
    pub(crate) fn poller_failed(&self, group: usize, st: &mut GroupState, err: &Error) {
        if !err.kind().is_fatal_for_group() {
            tracing::warn!(group, error = %err, "poller error ignored");
            return;
        }
        tracing::error!(group, error = %err, "poller wait failed, shutting the group down");
        st.shutdown = true;
        st.listener = None;
        while st.wake_thread_with(WakeReason::Shutdown) {}
        if let Some(poller) = &st.poller {
            if let Err(err) = poller.wake() {
                tracing::warn!(group, error = %err, "failed to wake listener");
            }
        }
    }

    /// Bookkeeping for a worker that left its loop.
    pub(crate) fn worker_exited(&self, group: usize) {
        let mut st = self.groups[group].state.lock();
        st.remove_thread();
        self.total_threads.fetch_sub(1, Ordering::AcqRel);
        if st.thread_count == 0 && st.shutdown {
            self.retire_group(group, st);
        }
    }

    /// Destroys a shut-down group with no threads left and reports it.
    fn retire_group(&self, group: usize, mut st: MutexGuard<'_, GroupState>) {
        let orphans = destroy_group(group, &mut st);
        drop(st);
        for conn in &orphans {
            self.close_connection(conn);
        }
        let mut st = self.groups[group].state.lock();
        self.report_destroyed(group, &mut st);
    }

    /// Counts a destroyed group towards releasing the array. Only groups
    /// destroyed after pool shutdown began are counted, each once.
    fn report_destroyed(&self, group: usize, st: &mut GroupState) {
        if !self.closing.load(Ordering::Acquire) || st.reported {
            return;
        }
        st.reported = true;
        let remaining = self.live_groups.fetch_sub(1, Ordering::AcqRel) - 1;
        tracing::trace!(group, remaining, "group destroyed");
        if remaining == 0 {
            let mut release = self.release.lock();
            release.released = true;
            release.releases += 1;
            self.release_cond.notify_all();
            tracing::debug!("thread group array released");
        }
    }

    /// Marks a group shut down and wakes everything that could be waiting
    /// in it.
    fn close_group(&self, group: usize) {
        let mut st = self.groups[group].state.lock();
        st.shutdown = true;
        if st.thread_count == 0 {
            self.retire_group(group, st);
            return;
        }
        st.listener = None;
        if let Some(poller) = &st.poller {
            if let Err(err) = poller.wake() {
                tracing::warn!(group, error = %err, "failed to wake listener");
            }
        }
        let mut woken = 0;
        while st.wake_thread_with(WakeReason::Shutdown) {
            woken += 1;
        }
        tracing::debug!(group, threads = st.thread_count, woken, "group closing");
    }

    fn wait_released(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut release = self.release.lock();
        while !release.released {
            if self.release_cond.wait_until(&mut release, deadline).timed_out() {
                return release.released;
            }
        }
        true
    }

    /// Per-tick stall check for one group.
    pub(crate) fn check_stall(self: &Arc<Self>, group: usize, now: u64) {
        let mut st = self.groups[group].state.lock();
        if st.destroyed || st.shutdown || st.poller.is_none() || st.connection_count == 0 {
            return;
        }

        let kickup = u64::try_from(self.config.kickup_timeout.as_micros()).unwrap_or(u64::MAX);
        let promoted = st.queues.promote_aged(now, kickup);
        if promoted > 0 {
            tracing::trace!(group, promoted, "promoted aged low-priority connections");
        }

        if st.listener.is_none() && st.io_event_count == 0 {
            let outcome = self.wake_or_create(group, &mut st);
            tracing::debug!(group, ?outcome, "group has no listener");
            return;
        }
        st.io_event_count = 0;

        if !st.queues.is_empty() && st.queue_event_count == 0 {
            st.stalled = true;
            st.counters.stalls_detected += 1;
            let outcome = self.wake_or_create(group, &mut st);
            tracing::warn!(
                group,
                queued = st.queues.len(),
                threads = st.thread_count,
                active = st.active_thread_count,
                ?outcome,
                "thread group stalled"
            );
        }
        st.queue_event_count = 0;
    }

    /// Fires `on_timeout` for armed connections whose deadline passed and
    /// republishes the earliest remaining deadline.
    pub(crate) fn timeout_check(&self, now: u64) {
        let mut expired = Vec::new();
        {
            let registry = self.registry.lock();
            for conn in registry.values() {
                let mut sched = conn.sched.lock();
                let deadline = sched.abs_wait_timeout;
                if deadline == NO_DEADLINE {
                    continue;
                }
                if sched.state == ConnectionState::Armed && deadline <= now {
                    sched.abs_wait_timeout = NO_DEADLINE;
                    expired.push(Arc::clone(conn));
                } else {
                    self.timer.set_next_timeout_check(deadline);
                }
            }
        }

        for conn in expired {
            self.timeouts_fired.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(connection = %conn.id(), "read timeout expired");
            let handler = &self.handler;
            if panic::catch_unwind(AssertUnwindSafe(|| handler.on_timeout(&conn))).is_err() {
                tracing::warn!(connection = %conn.id(), "on_timeout panicked");
            }
        }
    }
}

/// Drops the poller registration `conn` holds in `group`, if any.
fn unbind(group: usize, st: &mut GroupState, sched: &mut ConnectionSched, conn: &Connection) {
    let Some(token) = sched.token.take() else {
        return;
    };
    st.armed.remove(&token);
    st.tokens.release(token);
    if let Some(poller) = &st.poller {
        if let Err(err) = poller.disassociate(conn.handle()) {
            tracing::debug!(connection = %conn.id(), group, error = %err, "disassociate failed");
        }
    }
}

/// Empties a group that has no threads left. Returns the connections it
/// still owned so the caller can close them without the lock.
fn destroy_group(group: usize, st: &mut GroupState) -> Vec<Arc<Connection>> {
    if st.destroyed {
        return Vec::new();
    }
    st.destroyed = true;
    let mut orphans = st.queues.drain();
    orphans.extend(st.armed.drain().map(|(_, conn)| conn));
    st.poller = None;
    st.listener = None;
    st.idle.clear();
    tracing::debug!(group, orphans = orphans.len(), "thread group destroyed");
    orphans
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// A pool of worker threads partitioned into thread groups.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tgpool::{Dispatch, EventHandler, Pool};
///
/// struct Echo;
///
/// impl EventHandler for Echo {
///     fn handle(&self, dispatch: &mut Dispatch<'_>) {
///         // read the request, write the reply ...
///         dispatch.start_io();
///     }
/// }
///
/// let pool = Pool::builder().group_count(4).build(Arc::new(Echo))?;
/// // pool.add(connection)?;
/// pool.shutdown(std::time::Duration::from_secs(5));
/// # Ok::<(), tgpool::Error>(())
/// ```
pub struct Pool {
    shared: Arc<PoolShared>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Pool {
    /// Creates a pool, its group pollers and the stall timer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a bad configuration, `PollerCreate` if
    /// the first group's poller cannot be created, or `ThreadSpawn` if the
    /// timer thread cannot be started. A poller failure at a later group
    /// only lowers the group count.
    pub fn new(mut config: PoolConfig, handler: Arc<dyn EventHandler>) -> Result<Self> {
        config.normalize();
        config.validate()?;
        let initial_groups = config.group_count;
        let shared = Arc::new(PoolShared::new(config, handler));

        if let Err(err) = shared.resize(initial_groups) {
            if shared.group_count() == 0 {
                return Err(err);
            }
            tracing::warn!(
                requested = initial_groups,
                groups = shared.group_count(),
                error = %err,
                "started with fewer thread groups"
            );
        }

        shared.timer.refresh();
        let timer_shared = Arc::clone(&shared);
        let timer_handle = thread::Builder::new()
            .name(format!("{}-timer", shared.config.thread_name_prefix))
            .spawn(move || timer_main(timer_shared))
            .map_err(|err| Error::new(ErrorKind::ThreadSpawn).with_source(err))?;

        tracing::info!(
            groups = shared.group_count(),
            max_groups = shared.groups.len(),
            max_threads = shared.config.max_threads,
            stall_limit = ?shared.config.stall_limit,
            "thread pool started"
        );
        Ok(Self {
            shared,
            timer_handle: Mutex::new(Some(timer_handle)),
        })
    }

    /// Returns a builder with default settings.
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Hands a new connection to the pool.
    ///
    /// The connection is queued at high priority in group
    /// `id % group_count` and its first dispatch runs the logon handling.
    ///
    /// # Errors
    ///
    /// `Shutdown` if the pool or the target group is shut down;
    /// `InvalidState` if the connection was already added or its id is in
    /// use.
    pub fn add(&self, conn: Arc<Connection>) -> Result<()> {
        let shared = &self.shared;
        if shared.shutdown_started.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::Shutdown));
        }
        if conn.state() != ConnectionState::Created {
            return Err(Error::new(ErrorKind::InvalidState)
                .with_message(format!("{} was already added", conn.id())));
        }
        {
            let mut registry = shared.registry.lock();
            if registry.contains_key(&conn.id()) {
                return Err(Error::new(ErrorKind::InvalidState)
                    .with_message(format!("{} is already registered", conn.id())));
            }
            registry.insert(conn.id(), Arc::clone(&conn));
        }

        let group = conn.id().group_index(shared.group_count());
        let mut st = shared.groups[group].state.lock();
        if st.shutdown {
            drop(st);
            shared.registry.lock().remove(&conn.id());
            return Err(Error::group_shutdown(group));
        }
        {
            let mut sched = conn.sched.lock();
            sched.group = group;
            sched.state = ConnectionState::Queued;
        }
        st.connection_count += 1;
        st.queues
            .push_at(conn, Priority::High, shared.timer.current_micros());
        if st.active_thread_count == 0 {
            let outcome = shared.wake_or_create(group, &mut st);
            tracing::trace!(group, ?outcome, "connection added to group without active worker");
        }
        Ok(())
    }

    /// Changes the number of active groups.
    ///
    /// Growing creates pollers for the new groups. Connections move to their
    /// new group the next time they are re-armed. Groups beyond a smaller
    /// count keep serving their connections until those migrate.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `size` is outside `1..=max_groups`, `Shutdown`
    /// after shutdown began, or `PollerCreate` if a new group could not be
    /// initialized (the count is then cut to the groups that were).
    pub fn resize(&self, size: usize) -> Result<()> {
        let max = self.shared.groups.len();
        if size == 0 || size > max {
            return Err(Error::new(ErrorKind::InvalidConfig)
                .with_message(format!("group count {size} not in 1..={max}")));
        }
        if self.shared.shutdown_started.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::Shutdown));
        }
        self.shared.resize(size)
    }

    /// Changes the stall timer interval.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the interval is below the minimum.
    pub fn set_stall_limit(&self, interval: Duration) -> Result<()> {
        validate_stall_limit(interval)?;
        self.shared.timer.set_tick_interval(interval);
        tracing::info!(stall_limit = ?interval, "stall limit changed");
        Ok(())
    }

    /// Current stall timer interval.
    #[must_use]
    pub fn stall_limit(&self) -> Duration {
        self.shared.timer.tick_interval()
    }

    /// Shuts the pool down and waits up to `timeout` for every group to be
    /// destroyed.
    ///
    /// Returns true once the group array has been released. Calling it again
    /// only waits.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let shared = &self.shared;
        if shared
            .shutdown_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return shared.wait_released(timeout);
        }
        tracing::info!(groups = shared.group_count(), "thread pool shutting down");

        shared.timer.stop();
        if let Some(handle) = self.timer_handle.lock().take() {
            if handle.join().is_err() {
                tracing::warn!("stall timer thread panicked");
            }
        }

        shared.live_groups.store(shared.groups.len(), Ordering::Release);
        shared.closing.store(true, Ordering::Release);
        for group in 0..shared.groups.len() {
            shared.close_group(group);
        }

        let released = shared.wait_released(timeout);
        if released {
            tracing::info!("thread pool stopped");
        } else {
            tracing::warn!(
                remaining_groups = shared.live_groups.load(Ordering::Acquire),
                threads = shared.total_threads.load(Ordering::Acquire),
                ?timeout,
                "thread pool shutdown timed out"
            );
        }
        released
    }

    /// True once shutdown has begun.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown_started.load(Ordering::Acquire)
    }

    /// Number of active groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.shared.group_count()
    }

    /// Capacity of the group array.
    #[must_use]
    pub fn max_groups(&self) -> usize {
        self.shared.groups.len()
    }

    /// Threads not doing work: parked, listening, or inside a wait bracket.
    #[must_use]
    pub fn idle_thread_count(&self) -> usize {
        self.shared
            .groups
            .iter()
            .map(|g| {
                let st = g.state.lock();
                if st.poller.is_some() {
                    st.thread_count - st.active_thread_count
                } else {
                    0
                }
            })
            .sum()
    }

    /// Snapshot of one group. `None` if `index` is not below `max_groups`.
    #[must_use]
    pub fn group_stats(&self, index: usize) -> Option<GroupStats> {
        let group = self.shared.groups.get(index)?;
        let stats = group.state.lock().snapshot(index);
        Some(stats)
    }

    /// Snapshot of the whole pool.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        let groups: Vec<GroupStats> = (0..shared.groups.len())
            .filter_map(|i| self.group_stats(i))
            .filter(|g| g.initialized || g.destroyed)
            .collect();
        PoolStats {
            group_count: shared.group_count(),
            max_groups: shared.groups.len(),
            total_threads: shared.total_threads.load(Ordering::Acquire),
            idle_threads: groups
                .iter()
                .map(|g| g.thread_count - g.active_thread_count)
                .sum(),
            connections: shared.registry.lock().len(),
            threads_created: groups.iter().map(|g| g.threads_created).sum(),
            stalls_detected: groups.iter().map(|g| g.stalls_detected).sum(),
            events_dispatched: groups.iter().map(|g| g.events_dispatched).sum(),
            timeouts_fired: shared.timeouts_fired.load(Ordering::Relaxed),
            blocked_episodes: shared.blocked.episodes(),
            blocked_warnings: shared.blocked.warnings(),
            releases: shared.release.lock().releases,
            groups,
        }
    }

    /// Looks up a live connection.
    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.shared.registry.lock().get(&id).cloned()
    }

    /// The configuration the pool was built with.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("group_count", &self.group_count())
            .field("max_groups", &self.max_groups())
            .field("threads", &self.shared.total_threads.load(Ordering::Relaxed))
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if !self.is_shutdown() {
            self.shutdown(self.shared.config.shutdown_timeout);
        }
    }
}
