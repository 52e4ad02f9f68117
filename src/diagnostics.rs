//! Blocked-pool reporting.
//!
//! A failed worker creation opens a blocked episode. If the episode is still
//! open after `delay`, a single warning is logged; a successful creation
//! closes the episode. This keeps a pool that is pinned at its thread cap
//! from flooding the log.

use crate::error::ErrorKind;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Episode {
    started: Option<Instant>,
    reported: bool,
}

/// Throttled reporter for thread-creation failures.
#[derive(Debug)]
pub struct BlockedReporter {
    delay: Duration,
    episode: Mutex<Episode>,
    episodes: AtomicU64,
    warnings: AtomicU64,
}

impl BlockedReporter {
    /// Creates a reporter that warns after `delay` of continuous blockage.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            episode: Mutex::new(Episode::default()),
            episodes: AtomicU64::new(0),
            warnings: AtomicU64::new(0),
        }
    }

    /// Records a failed creation at `now`. Returns true if a warning was
    /// emitted.
    pub fn record_failure(&self, kind: ErrorKind, now: Instant) -> bool {
        let mut episode = self.episode.lock();
        let Some(started) = episode.started else {
            episode.started = Some(now);
            episode.reported = false;
            self.episodes.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        let blocked_for = now.saturating_duration_since(started);
        if episode.reported || blocked_for <= self.delay {
            return false;
        }
        episode.reported = true;
        self.warnings.fetch_add(1, Ordering::Relaxed);
        match kind {
            ErrorKind::MaxThreadsReached => tracing::warn!(
                blocked_secs = blocked_for.as_secs(),
                "pool could not create an additional worker because the thread cap \
                 was reached; raising max_threads may help. Clients holding resources \
                 for a long time are the usual cause"
            ),
            _ => tracing::warn!(
                blocked_secs = blocked_for.as_secs(),
                %kind,
                "pool could not create worker threads"
            ),
        }
        true
    }

    /// Records a successful creation, closing any open episode.
    pub fn record_success(&self) {
        let mut episode = self.episode.lock();
        if episode.started.take().is_some() {
            tracing::debug!("pool no longer blocked");
        }
        episode.reported = false;
    }

    /// True while an episode is open.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.episode.lock().started.is_some()
    }

    /// Episodes opened so far.
    #[must_use]
    pub fn episodes(&self) -> u64 {
        self.episodes.load(Ordering::Relaxed)
    }

    /// Warnings emitted so far.
    #[must_use]
    pub fn warnings(&self) -> u64 {
        self.warnings.load(Ordering::Relaxed)
    }
}
