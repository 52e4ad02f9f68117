//! tgpool: a thread-group pool for connection-oriented servers.
//!
//! # Overview
//!
//! tgpool serves many concurrent client connections with a small,
//! adaptively sized set of OS threads. Connections are partitioned into
//! thread groups; each group owns one readiness poller, two priority queues
//! and a list of idle workers, all behind one mutex.
//!
//! # Core Guarantees
//!
//! - **One dispatch per connection**: a connection is handled by at most one
//!   worker at a time; re-arming happens after the handler returns
//! - **At most one listener per group**: one worker blocks in the poller on
//!   behalf of the group, never while holding the group lock
//! - **No deadlock under load**: a group with no running worker always gets
//!   a thread immediately, even past the thread cap up to two per group
//! - **Stall repair**: a timer detects groups whose queue is not draining and
//!   adds workers, throttled by thread count
//! - **Bounded shutdown**: shutdown wakes every listener and idle worker and
//!   reports whether the group array was released in time
//!
//! # Module Structure
//!
//! - [`poller`]: Readiness notification behind the [`Poller`] trait
//! - [`connection`]: Per-client scheduling record
//! - [`group`]: Thread groups, queues and creation throttling
//! - [`worker`]: Worker threads, listener election and parking
//! - [`timer`]: Stall detection and read-timeout enforcement
//! - [`pool`]: The [`Pool`] itself: add, resize, shutdown
//! - [`dispatch`]: The [`EventHandler`] trait and per-call [`Dispatch`] context
//! - [`config`] / [`builder`] / [`env_config`]: Configuration layers
//! - [`diagnostics`]: Blocked-pool reporting
//! - [`stats`]: Counter snapshots
//! - [`error`]: Error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

#[cfg(test)]
#[macro_use]
pub mod test_utils;

pub mod builder;
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod dispatch;
pub mod env_config;
pub mod error;
pub mod group;
pub mod poller;
pub mod pool;
pub mod stats;
pub mod timer;
pub mod worker;

// Re-exports for convenient access to core types
pub use builder::PoolBuilder;
pub use config::{ConfigError, PoolConfig, ThreadHook, ThrottlePolicy, ThrottleTier};
pub use connection::{Connection, ConnectionId, ConnectionState, Priority};
pub use diagnostics::BlockedReporter;
pub use dispatch::{Dispatch, EventHandler, WaitGuard};
pub use error::{Error, ErrorCategory, ErrorKind, Result};
pub use group::{creation_decision, ConnectionQueues, CreationDecision, WakeOutcome};
pub use poller::{
    Event, Events, LabPoller, LabPollerFactory, OsPoller, Poller, PollerFactory, RawHandle, Token,
};
pub use pool::Pool;
pub use stats::{GroupStats, PoolStats};
pub use worker::{WakeReason, WorkerId};
