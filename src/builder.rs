//! Pool builder.
//!
//! Builder setters record explicit overrides. [`PoolBuilder::build`] starts
//! from [`PoolConfig::default`], layers the config file and the environment
//! (when requested) underneath, and applies the explicit overrides last.

use crate::config::{ConfigError, PoolConfig, ThreadHook, ThrottlePolicy};
use crate::dispatch::EventHandler;
use crate::env_config::apply_env_overrides;
use crate::error::Error;
use crate::poller::PollerFactory;
use crate::pool::Pool;
use std::sync::Arc;
use std::time::Duration;

/// Builder for constructing a pool with custom configuration.
#[derive(Clone, Default)]
pub struct PoolBuilder {
    overrides: Overrides,
    use_env: bool,
    #[cfg(feature = "config-file")]
    config_file: Option<std::path::PathBuf>,
}

#[derive(Clone, Default)]
struct Overrides {
    group_count: Option<usize>,
    max_groups: Option<usize>,
    max_threads: Option<usize>,
    oversubscribe: Option<usize>,
    stall_limit: Option<Duration>,
    idle_timeout: Option<Duration>,
    kickup_timeout: Option<Duration>,
    throttle: Option<ThrottlePolicy>,
    max_events: Option<usize>,
    blocked_message_delay: Option<Duration>,
    shutdown_timeout: Option<Duration>,
    thread_stack_size: Option<usize>,
    thread_name_prefix: Option<String>,
    poller_factory: Option<PollerFactory>,
    on_thread_start: Option<ThreadHook>,
    on_thread_stop: Option<ThreadHook>,
}

impl Overrides {
    fn apply(self, config: &mut PoolConfig) {
        if let Some(v) = self.group_count {
            config.group_count = v;
        }
        if let Some(v) = self.max_groups {
            config.max_groups = v;
        }
        if let Some(v) = self.max_threads {
            config.max_threads = v;
        }
        if let Some(v) = self.oversubscribe {
            config.oversubscribe = v;
        }
        if let Some(v) = self.stall_limit {
            config.stall_limit = v;
        }
        if let Some(v) = self.idle_timeout {
            config.idle_timeout = v;
        }
        if let Some(v) = self.kickup_timeout {
            config.kickup_timeout = v;
        }
        if let Some(v) = self.throttle {
            config.throttle = v;
        }
        if let Some(v) = self.max_events {
            config.max_events = v;
        }
        if let Some(v) = self.blocked_message_delay {
            config.blocked_message_delay = v;
        }
        if let Some(v) = self.shutdown_timeout {
            config.shutdown_timeout = v;
        }
        if let Some(v) = self.thread_stack_size {
            config.thread_stack_size = v;
        }
        if let Some(v) = self.thread_name_prefix {
            config.thread_name_prefix = v;
        }
        if let Some(v) = self.poller_factory {
            config.poller_factory = v;
        }
        if self.on_thread_start.is_some() {
            config.on_thread_start = self.on_thread_start;
        }
        if self.on_thread_stop.is_some() {
            config.on_thread_stop = self.on_thread_stop;
        }
    }
}

impl PoolBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of active thread groups.
    #[must_use]
    pub fn group_count(mut self, n: usize) -> Self {
        self.overrides.group_count = Some(n);
        self
    }

    /// Set the capacity of the group array.
    #[must_use]
    pub fn max_groups(mut self, n: usize) -> Self {
        self.overrides.max_groups = Some(n);
        self
    }

    /// Set the global worker thread cap.
    #[must_use]
    pub fn max_threads(mut self, n: usize) -> Self {
        self.overrides.max_threads = Some(n);
        self
    }

    /// Set the per-group oversubscription allowance.
    #[must_use]
    pub fn oversubscribe(mut self, n: usize) -> Self {
        self.overrides.oversubscribe = Some(n);
        self
    }

    /// Set the stall-detection tick interval.
    #[must_use]
    pub fn stall_limit(mut self, interval: Duration) -> Self {
        self.overrides.stall_limit = Some(interval);
        self
    }

    /// Set how long a parked worker waits before exiting.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.overrides.idle_timeout = Some(timeout);
        self
    }

    /// Set the age at which low-priority connections are promoted.
    #[must_use]
    pub fn kickup_timeout(mut self, timeout: Duration) -> Self {
        self.overrides.kickup_timeout = Some(timeout);
        self
    }

    /// Replace the thread-creation throttle.
    #[must_use]
    pub fn throttle(mut self, policy: ThrottlePolicy) -> Self {
        self.overrides.throttle = Some(policy);
        self
    }

    /// Set the maximum number of events collected per poller wait.
    #[must_use]
    pub fn max_events(mut self, n: usize) -> Self {
        self.overrides.max_events = Some(n);
        self
    }

    /// Set how long the pool must stay blocked before a warning is logged.
    #[must_use]
    pub fn blocked_message_delay(mut self, delay: Duration) -> Self {
        self.overrides.blocked_message_delay = Some(delay);
        self
    }

    /// Set how long dropping a running pool waits for its threads.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.overrides.shutdown_timeout = Some(timeout);
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.overrides.thread_stack_size = Some(size);
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.overrides.thread_name_prefix = Some(prefix.into());
        self
    }

    /// Use a custom poller backend.
    #[must_use]
    pub fn poller_factory(mut self, factory: PollerFactory) -> Self {
        self.overrides.poller_factory = Some(factory);
        self
    }

    /// Register a callback to run when a worker thread starts.
    #[must_use]
    pub fn on_thread_start<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.overrides.on_thread_start = Some(Arc::new(f));
        self
    }

    /// Register a callback to run when a worker thread stops.
    #[must_use]
    pub fn on_thread_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.overrides.on_thread_stop = Some(Arc::new(f));
        self
    }

    /// Read `TGPOOL_*` environment variables when building.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.use_env = true;
        self
    }

    /// Load settings from a TOML file when building.
    #[cfg(feature = "config-file")]
    #[must_use]
    pub fn config_file(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Resolve the final configuration without starting a pool.
    ///
    /// # Errors
    ///
    /// Returns an error if a file or environment layer cannot be parsed or
    /// the resulting configuration is invalid.
    pub fn build_config(self) -> Result<PoolConfig, ConfigError> {
        let mut config = PoolConfig::default();
        #[cfg(feature = "config-file")]
        {
            if let Some(path) = &self.config_file {
                let toml = crate::env_config::parse_toml_file(path)?;
                crate::env_config::apply_toml_config(&mut config, &toml)?;
            }
        }
        if self.use_env {
            apply_env_overrides(&mut config)?;
        }
        self.overrides.apply(&mut config);
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Build and start a pool that dispatches to `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`](crate::ErrorKind::InvalidConfig)
    /// for configuration problems, or the error from [`Pool::new`].
    pub fn build(self, handler: Arc<dyn EventHandler>) -> Result<Pool, Error> {
        let config = self.build_config()?;
        Pool::new(config, handler)
    }

    /// Small preset for tests and embedded use: one group, short ticks.
    #[must_use]
    pub fn single_group() -> Self {
        Self::new()
            .group_count(1)
            .max_groups(1)
            .stall_limit(Duration::from_millis(50))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env_config::{ENV_GROUP_COUNT, ENV_MAX_THREADS};

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn builder_overrides_defaults() {
        init_test("builder_overrides_defaults");
        let config = PoolBuilder::new()
            .group_count(3)
            .max_threads(40)
            .oversubscribe(2)
            .stall_limit(Duration::from_millis(20))
            .thread_name_prefix("custom")
            .build_config()
            .unwrap();
        assert_eq!(config.group_count, 3);
        assert_eq!(config.max_threads, 40);
        assert_eq!(config.oversubscribe, 2);
        assert_eq!(config.stall_limit, Duration::from_millis(20));
        assert_eq!(config.thread_name_prefix, "custom");
        assert!(config.max_groups >= 128);
        crate::test_complete!("builder_overrides_defaults");
    }

    #[test]
    fn builder_beats_environment() {
        init_test("builder_beats_environment");
        let _guard = crate::test_utils::env_lock();
        std::env::set_var(ENV_GROUP_COUNT, "7");
        std::env::set_var(ENV_MAX_THREADS, "70");
        let config = PoolBuilder::new()
            .with_env_overrides()
            .group_count(2)
            .build_config();
        std::env::remove_var(ENV_GROUP_COUNT);
        std::env::remove_var(ENV_MAX_THREADS);
        let config = config.unwrap();
        crate::assert_with_log!(
            config.group_count == 2,
            "builder wins",
            2,
            config.group_count
        );
        crate::assert_with_log!(
            config.max_threads == 70,
            "env applies",
            70,
            config.max_threads
        );
        crate::test_complete!("builder_beats_environment");
    }

    #[test]
    fn environment_ignored_unless_requested() {
        init_test("environment_ignored_unless_requested");
        let _guard = crate::test_utils::env_lock();
        std::env::set_var(ENV_MAX_THREADS, "70");
        let config = PoolBuilder::new().build_config();
        std::env::remove_var(ENV_MAX_THREADS);
        assert_eq!(config.unwrap().max_threads, 500);
        crate::test_complete!("environment_ignored_unless_requested");
    }

    #[test]
    fn invalid_config_is_rejected() {
        init_test("invalid_config_is_rejected");
        let err = PoolBuilder::new()
            .stall_limit(Duration::from_millis(1))
            .build_config()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                field: "stall_limit",
                ..
            }
        ));
        crate::test_complete!("invalid_config_is_rejected");
    }

    #[test]
    fn single_group_preset() {
        init_test("single_group_preset");
        let config = PoolBuilder::single_group().build_config().unwrap();
        assert_eq!(config.group_count, 1);
        assert_eq!(config.max_groups, 1);
        crate::test_complete!("single_group_preset");
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn file_is_lowest_layer() {
        use std::io::Write;

        init_test("file_is_lowest_layer");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pool]\ngroup_count = 5\nmax_threads = 55\noversubscribe = 9").unwrap();

        let _guard = crate::test_utils::env_lock();
        std::env::set_var(ENV_MAX_THREADS, "66");
        let config = PoolBuilder::new()
            .config_file(file.path())
            .with_env_overrides()
            .oversubscribe(4)
            .build_config();
        std::env::remove_var(ENV_MAX_THREADS);
        let config = config.unwrap();
        assert_eq!(config.group_count, 5);
        assert_eq!(config.max_threads, 66);
        assert_eq!(config.oversubscribe, 4);
        crate::test_complete!("file_is_lowest_layer");
    }
}
