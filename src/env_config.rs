//! Environment variable and config file support for [`PoolBuilder`](crate::builder::PoolBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`group_count(4)`)
//! 2. **Environment variables**: values from `TGPOOL_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`PoolConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `TGPOOL_GROUP_COUNT` | `usize` | `group_count` |
//! | `TGPOOL_MAX_THREADS` | `usize` | `max_threads` |
//! | `TGPOOL_OVERSUBSCRIBE` | `usize` | `oversubscribe` |
//! | `TGPOOL_STALL_LIMIT_MS` | `u64` | `stall_limit` |
//! | `TGPOOL_IDLE_TIMEOUT_MS` | `u64` | `idle_timeout` |
//! | `TGPOOL_KICKUP_TIMEOUT_MS` | `u64` | `kickup_timeout` |
//! | `TGPOOL_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |

use crate::config::{ConfigError, PoolConfig};
use std::time::Duration;

/// Environment variable name for the number of thread groups.
pub const ENV_GROUP_COUNT: &str = "TGPOOL_GROUP_COUNT";
/// Environment variable name for the global thread cap.
pub const ENV_MAX_THREADS: &str = "TGPOOL_MAX_THREADS";
/// Environment variable name for the oversubscription allowance.
pub const ENV_OVERSUBSCRIBE: &str = "TGPOOL_OVERSUBSCRIBE";
/// Environment variable name for the stall tick, in milliseconds.
pub const ENV_STALL_LIMIT_MS: &str = "TGPOOL_STALL_LIMIT_MS";
/// Environment variable name for the worker idle timeout, in milliseconds.
pub const ENV_IDLE_TIMEOUT_MS: &str = "TGPOOL_IDLE_TIMEOUT_MS";
/// Environment variable name for the low-priority kickup age, in milliseconds.
pub const ENV_KICKUP_TIMEOUT_MS: &str = "TGPOOL_KICKUP_TIMEOUT_MS";
/// Environment variable name for the worker thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "TGPOOL_THREAD_NAME_PREFIX";

/// All variables read by [`apply_env_overrides`].
pub const ALL_ENV_VARS: &[&str] = &[
    ENV_GROUP_COUNT,
    ENV_MAX_THREADS,
    ENV_OVERSUBSCRIBE,
    ENV_STALL_LIMIT_MS,
    ENV_IDLE_TIMEOUT_MS,
    ENV_KICKUP_TIMEOUT_MS,
    ENV_THREAD_NAME_PREFIX,
];

/// Apply environment variable overrides to a [`PoolConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut PoolConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_GROUP_COUNT) {
        config.group_count = parse_usize(ENV_GROUP_COUNT, &val)?;
    }
    if let Some(val) = read_env(ENV_MAX_THREADS) {
        config.max_threads = parse_usize(ENV_MAX_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_OVERSUBSCRIBE) {
        config.oversubscribe = parse_usize(ENV_OVERSUBSCRIBE, &val)?;
    }
    if let Some(val) = read_env(ENV_STALL_LIMIT_MS) {
        config.stall_limit = parse_millis(ENV_STALL_LIMIT_MS, &val)?;
    }
    if let Some(val) = read_env(ENV_IDLE_TIMEOUT_MS) {
        config.idle_timeout = parse_millis(ENV_IDLE_TIMEOUT_MS, &val)?;
    }
    if let Some(val) = read_env(ENV_KICKUP_TIMEOUT_MS) {
        config.kickup_timeout = parse_millis(ENV_KICKUP_TIMEOUT_MS, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| invalid(var_name, "unsigned integer", val))
}

fn parse_millis(var_name: &str, val: &str) -> Result<Duration, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| invalid(var_name, "milliseconds as u64", val))
}

fn invalid(var_name: &str, expected: &'static str, val: &str) -> ConfigError {
    ConfigError::InvalidEnvValue {
        var: var_name.to_string(),
        expected,
        value: val.to_string(),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable pool configuration.
///
/// Durations are given in milliseconds. Every field is optional:
///
/// ```toml
/// [pool]
/// group_count = 8
/// max_groups = 128
/// max_threads = 500
/// oversubscribe = 3
/// stall_limit_ms = 500
/// idle_timeout_ms = 60000
/// kickup_timeout_ms = 1000
/// max_events = 1024
///
/// [threads]
/// stack_size = 2097152
/// name_prefix = "db-worker"
///
/// [throttle]
/// ceiling_ms = 200
///
/// [[throttle.tiers]]
/// below_threads = 4
/// delay_ms = 0
///
/// [[throttle.tiers]]
/// below_threads = 8
/// delay_ms = 50
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct PoolTomlConfig {
    /// Scheduling settings.
    #[serde(default)]
    pub pool: PoolToml,
    /// Worker thread settings.
    #[serde(default)]
    pub threads: ThreadsToml,
    /// Thread-creation throttle. Replaces the default policy when present.
    pub throttle: Option<ThrottleToml>,
}

/// Pool section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct PoolToml {
    /// Number of thread groups.
    pub group_count: Option<usize>,
    /// Capacity of the group array.
    pub max_groups: Option<usize>,
    /// Global worker thread cap.
    pub max_threads: Option<usize>,
    /// Extra active workers tolerated per group.
    pub oversubscribe: Option<usize>,
    /// Stall tick in milliseconds.
    pub stall_limit_ms: Option<u64>,
    /// Worker idle timeout in milliseconds.
    pub idle_timeout_ms: Option<u64>,
    /// Low-priority kickup age in milliseconds.
    pub kickup_timeout_ms: Option<u64>,
    /// Maximum events per poller wait.
    pub max_events: Option<usize>,
    /// Blocked-pool warning delay in milliseconds.
    pub blocked_message_delay_ms: Option<u64>,
    /// Drop-time shutdown wait in milliseconds.
    pub shutdown_timeout_ms: Option<u64>,
}

/// Threads section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ThreadsToml {
    /// Stack size per worker thread in bytes.
    pub stack_size: Option<usize>,
    /// Name prefix for worker threads.
    pub name_prefix: Option<String>,
}

/// Throttle section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ThrottleToml {
    /// Ordered tiers.
    #[serde(default)]
    pub tiers: Vec<ThrottleTierToml>,
    /// Interval past the last tier, in milliseconds.
    #[serde(default)]
    pub ceiling_ms: u64,
}

/// One throttle tier in the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Debug)]
pub struct ThrottleTierToml {
    /// Applies while the group has fewer threads than this.
    pub below_threads: usize,
    /// Creation interval in milliseconds.
    pub delay_ms: u64,
}

/// Apply a parsed TOML config to a [`PoolConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
///
/// # Errors
///
/// Returns an error if the throttle section is not monotonic.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut PoolConfig, toml: &PoolTomlConfig) -> Result<(), ConfigError> {
    let pool = &toml.pool;
    if let Some(v) = pool.group_count {
        config.group_count = v;
    }
    if let Some(v) = pool.max_groups {
        config.max_groups = v;
    }
    if let Some(v) = pool.max_threads {
        config.max_threads = v;
    }
    if let Some(v) = pool.oversubscribe {
        config.oversubscribe = v;
    }
    if let Some(v) = pool.stall_limit_ms {
        config.stall_limit = Duration::from_millis(v);
    }
    if let Some(v) = pool.idle_timeout_ms {
        config.idle_timeout = Duration::from_millis(v);
    }
    if let Some(v) = pool.kickup_timeout_ms {
        config.kickup_timeout = Duration::from_millis(v);
    }
    if let Some(v) = pool.max_events {
        config.max_events = v;
    }
    if let Some(v) = pool.blocked_message_delay_ms {
        config.blocked_message_delay = Duration::from_millis(v);
    }
    if let Some(v) = pool.shutdown_timeout_ms {
        config.shutdown_timeout = Duration::from_millis(v);
    }
    if let Some(v) = toml.threads.stack_size {
        config.thread_stack_size = v;
    }
    if let Some(ref v) = toml.threads.name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
    if let Some(ref throttle) = toml.throttle {
        let tiers = throttle
            .tiers
            .iter()
            .map(|t| {
                crate::config::ThrottleTier::new(t.below_threads, Duration::from_millis(t.delay_ms))
            })
            .collect();
        config.throttle = crate::config::ThrottlePolicy::new(
            tiers,
            Duration::from_millis(throttle.ceiling_ms),
        )?;
    }
    Ok(())
}

/// Parse a TOML string into a [`PoolTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<PoolTomlConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Read and parse a TOML file into a [`PoolTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<PoolTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================
