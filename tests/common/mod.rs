#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use parking_lot::{Condvar, Mutex};
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};
use tgpool::{
    Connection, ConnectionId, Dispatch, EventHandler, LabPollerFactory, Pool, PoolBuilder,
    RawHandle,
};

static INIT_LOGGING: Once = Once::new();

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;

const PROPTEST_SEED_ENV: &str = "TGPOOL_PROPTEST_SEED";

/// Upper bound for conditions reached by pool threads.
pub const WAIT: Duration = Duration::from_secs(5);

/// Build a ProptestConfig with deterministic seed support for CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = read_proptest_seed() {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }
    std::env::var("CI").ok().map(|_| DEFAULT_PROPTEST_SEED)
}

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Polls `cond` every millisecond until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return cond();
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// A pool wired to a lab poller factory with a fast stall timer.
pub fn lab_builder(groups: usize) -> (PoolBuilder, Arc<LabPollerFactory>) {
    let lab = LabPollerFactory::new();
    let builder = Pool::builder()
        .group_count(groups)
        .max_groups(groups.max(8))
        .stall_limit(Duration::from_millis(20))
        .idle_timeout(Duration::from_secs(30))
        .poller_factory(lab.factory());
    (builder, lab)
}

/// Fake socket handle for a lab connection.
#[must_use]
pub fn lab_handle(id: u64) -> RawHandle {
    (1000 + id) as RawHandle
}

/// A lab connection whose handle is derived from its id.
#[must_use]
pub fn lab_connection(id: u64) -> Arc<Connection> {
    Connection::new(ConnectionId(id), lab_handle(id))
}

/// A latch that blocks handlers until opened.
#[derive(Debug, Default)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
    waiting: AtomicUsize,
}

impl Gate {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Blocks until the gate opens.
    pub fn pass(&self) {
        let mut open = self.open.lock();
        self.waiting.fetch_add(1, Ordering::SeqCst);
        while !*open {
            self.cond.wait(&mut open);
        }
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.cond.notify_all();
    }

    /// Threads currently blocked in [`pass`](Self::pass).
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

type HandleFn = dyn Fn(&mut Dispatch<'_>) + Send + Sync;
type ConnFn = dyn Fn(&Arc<Connection>) + Send + Sync;

/// Handler built from closures that records what the pool did.
pub struct Recorder {
    on_handle: Box<HandleFn>,
    on_timeout: Option<Box<ConnFn>>,
    handled: Mutex<HashMap<ConnectionId, usize>>,
    closed: Mutex<Vec<ConnectionId>>,
    timed_out: Mutex<Vec<ConnectionId>>,
}

impl Recorder {
    pub fn new(on_handle: impl Fn(&mut Dispatch<'_>) + Send + Sync + 'static) -> Self {
        Self {
            on_handle: Box::new(on_handle),
            on_timeout: None,
            handled: Mutex::new(HashMap::new()),
            closed: Mutex::new(Vec::new()),
            timed_out: Mutex::new(Vec::new()),
        }
    }

    /// Handler that re-arms every connection.
    pub fn rearming() -> Self {
        Self::new(|d| d.start_io())
    }

    #[must_use]
    pub fn with_timeout(mut self, f: impl Fn(&Arc<Connection>) + Send + Sync + 'static) -> Self {
        self.on_timeout = Some(Box::new(f));
        self
    }

    pub fn handled(&self, id: u64) -> usize {
        self.handled
            .lock()
            .get(&ConnectionId(id))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_handled(&self) -> usize {
        self.handled.lock().values().sum()
    }

    pub fn closed(&self) -> Vec<ConnectionId> {
        self.closed.lock().clone()
    }

    pub fn closed_count(&self) -> usize {
        self.closed.lock().len()
    }

    pub fn timed_out(&self) -> Vec<ConnectionId> {
        self.timed_out.lock().clone()
    }
}

impl EventHandler for Recorder {
    fn handle(&self, dispatch: &mut Dispatch<'_>) {
        *self.handled.lock().entry(dispatch.id()).or_insert(0) += 1;
        (self.on_handle)(dispatch);
    }

    fn on_timeout(&self, connection: &Arc<Connection>) {
        self.timed_out.lock().push(connection.id());
        if let Some(f) = &self.on_timeout {
            f(connection);
        }
    }

    fn on_close(&self, connection: &Arc<Connection>) {
        self.closed.lock().push(connection.id());
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}
