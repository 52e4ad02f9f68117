//! Error types for the thread-group pool.
//!
//! Errors never cross component boundaries as panics. Every fallible pool
//! operation returns a [`Result`] whose [`ErrorKind`] says which failure class
//! occurred:
//!
//! - **Poller**: creating, registering with, or waiting on the readiness
//!   facility failed. A wait failure is fatal for the owning group.
//! - **Thread**: a worker thread could not be created. These are transient and
//!   retried implicitly by the next enqueue or the next timer tick.
//! - **Lifecycle**: the pool or group is shutting down, or an operation was
//!   attempted in a state that does not allow it.
//! - **Config**: the configuration is invalid.

use core::fmt;
use std::io;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Poller ===
    /// The readiness facility could not be created.
    PollerCreate,
    /// Waiting for readiness failed with a non-transient error.
    PollerWait,
    /// Associating or re-arming a handle failed.
    PollerRegister,

    // === Threads ===
    /// The operating system refused to spawn a worker thread.
    ThreadSpawn,
    /// The global thread cap was reached.
    MaxThreadsReached,

    // === Lifecycle ===
    /// The pool or group is shut down.
    Shutdown,
    /// The operation is not valid in the current state.
    InvalidState,

    // === Config ===
    /// The configuration is invalid.
    InvalidConfig,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::PollerCreate | Self::PollerWait | Self::PollerRegister => ErrorCategory::Poller,
            Self::ThreadSpawn | Self::MaxThreadsReached => ErrorCategory::Thread,
            Self::Shutdown | Self::InvalidState => ErrorCategory::Lifecycle,
            Self::InvalidConfig => ErrorCategory::Config,
        }
    }

    /// Returns true if retrying later may succeed.
    ///
    /// Thread-creation failures clear up once load drops or threads retire.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ThreadSpawn | Self::MaxThreadsReached)
    }

    /// Returns true if this failure shuts down the group that observed it.
    #[must_use]
    pub const fn is_fatal_for_group(&self) -> bool {
        matches!(self, Self::PollerWait)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PollerCreate => "poller creation failed",
            Self::PollerWait => "poller wait failed",
            Self::PollerRegister => "poller registration failed",
            Self::ThreadSpawn => "worker thread spawn failed",
            Self::MaxThreadsReached => "maximum thread count reached",
            Self::Shutdown => "pool is shut down",
            Self::InvalidState => "invalid state",
            Self::InvalidConfig => "invalid configuration",
        };
        f.write_str(s)
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Readiness facility failures.
    Poller,
    /// Worker thread creation failures.
    Thread,
    /// Pool and group lifecycle failures.
    Lifecycle,
    /// Configuration failures.
    Config,
}

/// The main error type for pool operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the attached message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns true if this error reports a shut-down pool or group.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self.kind, ErrorKind::Shutdown)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Wraps an I/O error from the readiness facility.
    #[must_use]
    pub fn poller(kind: ErrorKind, err: io::Error) -> Self {
        Self::new(kind).with_source(err)
    }

    /// Creates a shutdown error naming the group that refused the operation.
    #[must_use]
    pub fn group_shutdown(group: usize) -> Self {
        Self::new(ErrorKind::Shutdown).with_message(format!("group {group} is shut down"))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<crate::config::ConfigError> for Error {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::new(ErrorKind::InvalidConfig).with_source(err)
    }
}

/// A specialized Result type for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
