//! Property tests for queue discipline and creation throttling.

mod common;

use common::test_proptest_config;
use proptest::prelude::*;
use std::time::{Duration, Instant};
use tgpool::{
    creation_decision, Connection, ConnectionId, ConnectionQueues, CreationDecision, Priority,
    ThrottlePolicy, ThrottleTier,
};

fn priority() -> impl Strategy<Value = Priority> {
    prop_oneof![Just(Priority::High), Just(Priority::Low)]
}

/// Queues one connection per entry; entry `i` is enqueued at `i * 100`us.
fn queued(priorities: &[Priority]) -> ConnectionQueues {
    let mut queues = ConnectionQueues::new();
    for (i, p) in priorities.iter().enumerate() {
        let conn = Connection::new(ConnectionId(i as u64), i as tgpool::RawHandle);
        conn.set_priority(*p);
        queues.push_at(conn, *p, i as u64 * 100);
    }
    queues
}

proptest! {
    #![proptest_config(test_proptest_config(256))]

    /// Every High connection leaves before any Low one, and each class is
    /// FIFO.
    #[test]
    fn high_drains_first_and_fifo(priorities in prop::collection::vec(priority(), 0..64)) {
        let mut queues = queued(&priorities);
        prop_assert_eq!(queues.len(), priorities.len());

        let order: Vec<usize> = std::iter::from_fn(|| queues.pop())
            .map(|c| c.id().0 as usize)
            .collect();
        let mut expected: Vec<usize> = (0..priorities.len())
            .filter(|&i| priorities[i] == Priority::High)
            .collect();
        expected.extend((0..priorities.len()).filter(|&i| priorities[i] == Priority::Low));
        prop_assert_eq!(order, expected);
        prop_assert!(queues.is_empty());
    }

    /// Promotion moves exactly the Low entries older than the kickup age,
    /// keeping their relative order behind the existing High entries.
    #[test]
    fn promotion_moves_only_aged_low_entries(
        priorities in prop::collection::vec(priority(), 1..48),
        kickup in 1u64..1_000,
        now in 1_000u64..5_000,
    ) {
        let mut queues = queued(&priorities);
        let aged = |i: usize| {
            priorities[i] == Priority::Low && now.saturating_sub(i as u64 * 100) > kickup
        };

        let promoted = queues.promote_aged(now, kickup);
        let expected_promoted = (0..priorities.len()).filter(|&i| aged(i)).count();
        prop_assert_eq!(promoted, expected_promoted);
        prop_assert_eq!(queues.len_of(Priority::Low), priorities.iter().filter(|p| **p == Priority::Low).count() - promoted);

        let order: Vec<usize> = std::iter::from_fn(|| queues.pop())
            .map(|c| c.id().0 as usize)
            .collect();
        let mut expected: Vec<usize> = (0..priorities.len())
            .filter(|&i| priorities[i] == Priority::High)
            .collect();
        expected.extend((0..priorities.len()).filter(|&i| aged(i)));
        expected.extend((0..priorities.len()).filter(|&i| priorities[i] == Priority::Low && !aged(i)));
        prop_assert_eq!(order, expected);
    }

    /// The default throttle interval never shrinks as threads grow.
    #[test]
    fn throttle_is_monotonic(a in 0usize..200, b in 0usize..200) {
        let policy = ThrottlePolicy::default();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(policy.interval_for(lo) <= policy.interval_for(hi));
        prop_assert!(policy.interval_for(hi) <= policy.ceiling());
    }

    /// Custom tiers built from increasing thresholds and non-decreasing
    /// delays validate and stay monotonic.
    #[test]
    fn valid_custom_tiers_are_monotonic(
        steps in prop::collection::vec((1usize..10, 0u64..50), 1..6),
        thread_count in 0usize..100,
    ) {
        let mut below = 0;
        let mut delay = 0;
        let tiers: Vec<ThrottleTier> = steps
            .iter()
            .map(|(dt, dd)| {
                below += dt;
                delay += dd;
                ThrottleTier::new(below, Duration::from_millis(delay))
            })
            .collect();
        let ceiling = Duration::from_millis(delay + 10);
        let policy = ThrottlePolicy::new(tiers, ceiling).expect("valid tiers");
        prop_assert!(policy.interval_for(thread_count) <= policy.interval_for(thread_count + 1));
    }

    /// A group with no active worker always gets a thread unless it already
    /// has more threads than connections.
    #[test]
    fn idle_group_creates_without_delay(
        threads in 0usize..64,
        connections in 0usize..64,
        since_ms in 0u64..300,
    ) {
        let now = Instant::now();
        let last = now.checked_sub(Duration::from_millis(since_ms));
        let decision = creation_decision(threads, 0, connections, last, &ThrottlePolicy::default(), now);
        if threads > connections {
            prop_assert_eq!(decision, CreationDecision::NotNeeded);
        } else {
            prop_assert_eq!(decision, CreationDecision::Create);
        }
    }
}
