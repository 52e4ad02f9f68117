//! Pool configuration types.
//!
//! These types hold the concrete values that drive scheduling behavior. In
//! most cases you should use [`PoolBuilder`](crate::builder::PoolBuilder) to
//! construct a pool rather than creating a [`PoolConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `group_count` | available CPU parallelism |
//! | `max_groups` | `max(group_count, 128)` |
//! | `max_threads` | 500 |
//! | `oversubscribe` | 3 |
//! | `stall_limit` | 500 ms |
//! | `idle_timeout` | 60 s |
//! | `kickup_timeout` | 1000 ms |
//! | `throttle` | 0 ms below 4 threads, 50 ms below 8, 100 ms below 16, else 200 ms |
//! | `max_events` | 1024 |
//! | `blocked_message_delay` | 30 s |
//! | `shutdown_timeout` | 5 s |
//! | `thread_stack_size` | 2 MiB |
//! | `thread_name_prefix` | `"tgpool-worker"` |
//! | `poller_factory` | [`OsPoller::factory`] |

use crate::poller::{OsPoller, PollerFactory};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Largest accepted number of thread groups.
pub const MAX_GROUPS: usize = 100_000;
/// Largest accepted global thread cap.
pub const MAX_THREADS_LIMIT: usize = 65_536;
/// Largest accepted oversubscription allowance.
pub const MAX_OVERSUBSCRIBE: usize = 1000;
/// Shortest accepted stall-detection tick.
pub const MIN_STALL_LIMIT: Duration = Duration::from_millis(10);

const DEFAULT_MAX_GROUPS: usize = 128;
const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;
const DEFAULT_THREAD_NAME_PREFIX: &str = "tgpool-worker";

/// Errors produced while loading or validating a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable is set but cannot be parsed.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidEnvValue {
        /// Variable name.
        var: String,
        /// Human-readable expected type.
        expected: &'static str,
        /// Raw value.
        value: String,
    },
    /// A field lies outside its accepted range.
    #[error("{field} is out of range: {reason}")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// What was wrong.
        reason: String,
    },
    /// Throttle tiers are not monotonically non-decreasing.
    #[error("throttle tier {index} is not monotonic: {reason}")]
    NonMonotonicThrottle {
        /// Index of the offending tier (`tiers.len()` means the ceiling).
        index: usize,
        /// What was wrong.
        reason: String,
    },
    /// A configuration file could not be read.
    #[error("failed to read config file {path}: {reason}")]
    ReadFile {
        /// File path.
        path: String,
        /// I/O error text.
        reason: String,
    },
    /// A configuration file could not be parsed.
    #[error("failed to parse TOML config: {0}")]
    Parse(String),
}

/// One step of the thread-creation throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleTier {
    /// The tier applies while the group has fewer threads than this.
    pub below_threads: usize,
    /// Minimum time between two thread creations in the group.
    pub delay: Duration,
}

impl ThrottleTier {
    /// Creates a tier.
    #[must_use]
    pub const fn new(below_threads: usize, delay: Duration) -> Self {
        Self {
            below_threads,
            delay,
        }
    }
}

/// Step function from a group's thread count to its creation interval.
///
/// Tiers are checked in order; the first tier whose `below_threads` exceeds
/// the thread count wins, otherwise `ceiling` applies. A policy is only
/// constructible when thresholds strictly increase and delays never decrease,
/// so the interval is monotonic in the thread count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottlePolicy {
    tiers: Vec<ThrottleTier>,
    ceiling: Duration,
}

impl ThrottlePolicy {
    /// Creates a validated policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NonMonotonicThrottle`] if thresholds do not
    /// strictly increase or a delay is smaller than the one before it.
    pub fn new(tiers: Vec<ThrottleTier>, ceiling: Duration) -> Result<Self, ConfigError> {
        let policy = Self { tiers, ceiling };
        policy.validate()?;
        Ok(policy)
    }

    /// A policy that never delays thread creation.
    #[must_use]
    pub fn unthrottled() -> Self {
        Self {
            tiers: Vec::new(),
            ceiling: Duration::ZERO,
        }
    }

    /// Returns the creation interval for a group with `thread_count` threads.
    #[must_use]
    pub fn interval_for(&self, thread_count: usize) -> Duration {
        self.tiers
            .iter()
            .find(|tier| thread_count < tier.below_threads)
            .map_or(self.ceiling, |tier| tier.delay)
    }

    /// The configured tiers, in order.
    #[must_use]
    pub fn tiers(&self) -> &[ThrottleTier] {
        &self.tiers
    }

    /// Interval applied past the last tier.
    #[must_use]
    pub const fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Checks the monotonicity invariant.
    ///
    /// # Errors
    ///
    /// See [`ThrottlePolicy::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut prev: Option<ThrottleTier> = None;
        for (index, tier) in self.tiers.iter().enumerate() {
            if let Some(prev) = prev {
                if tier.below_threads <= prev.below_threads {
                    return Err(ConfigError::NonMonotonicThrottle {
                        index,
                        reason: format!(
                            "threshold {} does not exceed previous threshold {}",
                            tier.below_threads, prev.below_threads
                        ),
                    });
                }
                if tier.delay < prev.delay {
                    return Err(ConfigError::NonMonotonicThrottle {
                        index,
                        reason: format!(
                            "delay {:?} is smaller than previous delay {:?}",
                            tier.delay, prev.delay
                        ),
                    });
                }
            }
            prev = Some(*tier);
        }
        if let Some(last) = prev {
            if self.ceiling < last.delay {
                return Err(ConfigError::NonMonotonicThrottle {
                    index: self.tiers.len(),
                    reason: format!(
                        "ceiling {:?} is smaller than last delay {:?}",
                        self.ceiling, last.delay
                    ),
                });
            }
        }
        Ok(())
    }
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                ThrottleTier::new(4, Duration::ZERO),
                ThrottleTier::new(8, Duration::from_millis(50)),
                ThrottleTier::new(16, Duration::from_millis(100)),
            ],
            ceiling: Duration::from_millis(200),
        }
    }
}

/// Callback run on worker thread start or stop.
pub type ThreadHook = Arc<dyn Fn() + Send + Sync>;

/// Pool configuration.
#[derive(Clone)]
pub struct PoolConfig {
    /// Number of active thread groups (default: available parallelism).
    pub group_count: usize,
    /// Capacity of the group array; bounds [`Pool::resize`](crate::Pool::resize).
    pub max_groups: usize,
    /// Global worker thread cap. A group may always grow to two threads.
    pub max_threads: usize,
    /// Extra concurrently active workers tolerated per group.
    pub oversubscribe: usize,
    /// Stall-detection tick interval.
    pub stall_limit: Duration,
    /// Idle time after which a parked worker exits.
    pub idle_timeout: Duration,
    /// Age after which a low-priority connection is promoted.
    pub kickup_timeout: Duration,
    /// Thread-creation throttle.
    pub throttle: ThrottlePolicy,
    /// Maximum events collected by a single poller wait.
    pub max_events: usize,
    /// How long the pool must stay blocked before a warning is logged.
    pub blocked_message_delay: Duration,
    /// How long dropping a running pool waits for its threads.
    pub shutdown_timeout: Duration,
    /// Stack size per worker thread.
    pub thread_stack_size: usize,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
    /// Creates one poller per active group.
    pub poller_factory: PollerFactory,
    /// Callback executed when a worker thread starts.
    pub on_thread_start: Option<ThreadHook>,
    /// Callback executed when a worker thread stops.
    pub on_thread_stop: Option<ThreadHook>,
}

impl PoolConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.group_count == 0 {
            self.group_count = Self::default_group_count();
        }
        if self.max_groups < self.group_count {
            self.max_groups = self.group_count;
        }
        if self.max_events == 0 {
            self.max_events = 1;
        }
        if self.thread_stack_size == 0 {
            self.thread_stack_size = DEFAULT_STACK_SIZE;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
    }

    /// Checks every field against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group_count == 0 || self.group_count > self.max_groups {
            return Err(out_of_range(
                "group_count",
                format!("{} not in 1..={}", self.group_count, self.max_groups),
            ));
        }
        if self.max_groups > MAX_GROUPS {
            return Err(out_of_range(
                "max_groups",
                format!("{} exceeds {MAX_GROUPS}", self.max_groups),
            ));
        }
        if self.max_threads == 0 || self.max_threads > MAX_THREADS_LIMIT {
            return Err(out_of_range(
                "max_threads",
                format!("{} not in 1..={MAX_THREADS_LIMIT}", self.max_threads),
            ));
        }
        if self.oversubscribe == 0 || self.oversubscribe > MAX_OVERSUBSCRIBE {
            return Err(out_of_range(
                "oversubscribe",
                format!("{} not in 1..={MAX_OVERSUBSCRIBE}", self.oversubscribe),
            ));
        }
        validate_stall_limit(self.stall_limit)?;
        if self.idle_timeout.is_zero() {
            return Err(out_of_range("idle_timeout", "must be non-zero".into()));
        }
        if self.max_events == 0 {
            return Err(out_of_range("max_events", "must be non-zero".into()));
        }
        self.throttle.validate()
    }

    pub(crate) fn default_group_count() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .max(1)
    }
}

pub(crate) fn validate_stall_limit(limit: Duration) -> Result<(), ConfigError> {
    if limit < MIN_STALL_LIMIT {
        return Err(out_of_range(
            "stall_limit",
            format!("{limit:?} is below {MIN_STALL_LIMIT:?}"),
        ));
    }
    Ok(())
}

fn out_of_range(field: &'static str, reason: String) -> ConfigError {
    ConfigError::OutOfRange { field, reason }
}

impl Default for PoolConfig {
    fn default() -> Self {
        let group_count = Self::default_group_count();
        Self {
            group_count,
            max_groups: group_count.max(DEFAULT_MAX_GROUPS),
            max_threads: 500,
            oversubscribe: 3,
            stall_limit: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(60),
            kickup_timeout: Duration::from_millis(1000),
            throttle: ThrottlePolicy::default(),
            max_events: 1024,
            blocked_message_delay: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
            thread_stack_size: DEFAULT_STACK_SIZE,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            poller_factory: OsPoller::factory(),
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("group_count", &self.group_count)
            .field("max_groups", &self.max_groups)
            .field("max_threads", &self.max_threads)
            .field("oversubscribe", &self.oversubscribe)
            .field("stall_limit", &self.stall_limit)
            .field("idle_timeout", &self.idle_timeout)
            .field("kickup_timeout", &self.kickup_timeout)
            .field("throttle", &self.throttle)
            .field("max_events", &self.max_events)
            .field("blocked_message_delay", &self.blocked_message_delay)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("thread_stack_size", &self.thread_stack_size)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .finish_non_exhaustive()
    }
}
