//! Point-in-time snapshots of pool counters.

use std::fmt;

/// Snapshot of one thread group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Group index.
    pub index: usize,
    /// Whether the group has a poller.
    pub initialized: bool,
    /// Worker threads alive in the group.
    pub thread_count: usize,
    /// Workers not parked, not listening and not inside a wait bracket.
    pub active_thread_count: usize,
    /// Workers parked on the idle list.
    pub idle_thread_count: usize,
    /// Connections owned by the group.
    pub connection_count: usize,
    /// Connections in the high-priority queue.
    pub queued_high: usize,
    /// Connections in the low-priority queue.
    pub queued_low: usize,
    /// Connections waiting for a readiness event.
    pub armed: usize,
    /// Connections holding a poller registration, armed or dispatched.
    pub registered: usize,
    /// Whether a worker is currently listening.
    pub has_listener: bool,
    /// Stall flag set by the timer, cleared on the next dequeue.
    pub stalled: bool,
    /// Whether the group is shutting down.
    pub shutdown: bool,
    /// Whether the group was torn down after its last thread exited.
    pub destroyed: bool,
    /// Workers started over the group's lifetime.
    pub threads_created: u64,
    /// Stalls the timer detected.
    pub stalls_detected: u64,
    /// Connections handed to workers.
    pub events_dispatched: u64,
}

impl GroupStats {
    /// Total queued connections.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queued_high + self.queued_low
    }
}

/// Snapshot of the whole pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Active group count.
    pub group_count: usize,
    /// Group array capacity.
    pub max_groups: usize,
    /// Worker threads alive across all groups.
    pub total_threads: usize,
    /// Threads not doing work, summed over initialized groups.
    pub idle_threads: usize,
    /// Connections registered with the pool.
    pub connections: usize,
    /// Workers started over the pool's lifetime.
    pub threads_created: u64,
    /// Stalls detected across all groups.
    pub stalls_detected: u64,
    /// Connections handed to workers.
    pub events_dispatched: u64,
    /// Timeouts delivered to the handler.
    pub timeouts_fired: u64,
    /// Blocked episodes opened by failed thread creation.
    pub blocked_episodes: u64,
    /// Blocked-pool warnings emitted.
    pub blocked_warnings: u64,
    /// Times the group array was released (0 or 1).
    pub releases: u64,
    /// Per-group snapshots of groups that are initialized or were destroyed.
    pub groups: Vec<GroupStats>,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "groups={}/{} threads={} idle={} connections={} created={} stalls={} dispatched={}",
            self.group_count,
            self.max_groups,
            self.total_threads,
            self.idle_threads,
            self.connections,
            self.threads_created,
            self.stalls_detected,
            self.events_dispatched,
        )
    }
}
