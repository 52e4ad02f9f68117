//! Group resizing and lazy connection migration.

#[macro_use]
mod common;

use common::*;
use std::sync::Arc;
use tgpool::{ConnectionId, ConnectionState, ErrorKind};

fn armed_in(pool: &tgpool::Pool, id: u64, group: usize) -> bool {
    pool.connection(ConnectionId(id))
        .is_some_and(|c| c.group() == group && c.state() == ConnectionState::Armed)
}

#[test]
fn connections_migrate_on_next_rearm() {
    init_test_logging();
    test_phase!("connections_migrate_on_next_rearm");

    let handler = Arc::new(Recorder::rearming());
    let (builder, lab) = lab_builder(2);
    let pool = builder.build(handler.clone()).expect("pool");
    assert_eq!(pool.group_count(), 2);

    test_section!("initial placement");
    for id in 0..10 {
        pool.add(lab_connection(id)).expect("add");
    }
    let placed = wait_until(WAIT, || (0..10).all(|id| armed_in(&pool, id, (id % 2) as usize)));
    assert_with_log!(placed, "connections armed by id % 2", true, placed);
    assert_eq!(pool.group_stats(0).map(|g| g.connection_count), Some(5));
    assert_eq!(pool.group_stats(1).map(|g| g.connection_count), Some(5));

    test_section!("resize");
    pool.resize(4).expect("resize");
    assert_eq!(pool.group_count(), 4);
    // Nothing moves until the next event.
    assert_eq!(pool.group_stats(2).map(|g| g.connection_count), Some(0));
    assert!((0..10).all(|id| armed_in(&pool, id, (id % 2) as usize)));

    test_section!("migration");
    for id in 0..10 {
        assert!(lab.inject_ready(lab_handle(id)), "conn {id} armed");
    }
    let migrated = wait_until(WAIT, || (0..10).all(|id| armed_in(&pool, id, (id % 4) as usize)));
    assert_with_log!(migrated, "connections armed by id % 4", true, migrated);

    let counts: Vec<usize> = (0..4)
        .map(|g| pool.group_stats(g).map_or(0, |s| s.connection_count))
        .collect();
    assert_with_log!(counts == vec![3, 3, 2, 2], "counts reconcile", vec![3, 3, 2, 2], counts);
    for g in 2..4 {
        let stats = pool.group_stats(g).expect("group");
        assert!(stats.thread_count >= 1, "destination group {g} got a worker");
        assert_eq!(stats.armed, 2);
    }
    for id in 0..10 {
        assert!(lab.is_armed(lab_handle(id)));
        assert_eq!(handler.handled(id), 2);
    }

    assert!(pool.shutdown(WAIT));
    assert_eq!(handler.closed_count(), 10);
    test_complete!("connections_migrate_on_next_rearm");
}

#[test]
fn shrinking_moves_connections_back() {
    init_test_logging();
    test_phase!("shrinking_moves_connections_back");

    let handler = Arc::new(Recorder::rearming());
    let (builder, lab) = lab_builder(3);
    let pool = builder.build(handler.clone()).expect("pool");

    for id in 0..6 {
        pool.add(lab_connection(id)).expect("add");
    }
    assert!(wait_until(WAIT, || (0..6).all(|id| armed_in(&pool, id, (id % 3) as usize))));

    pool.resize(1).expect("shrink");
    // Group 2 keeps its connections until they fire.
    assert_eq!(pool.group_stats(2).map(|g| g.connection_count), Some(2));
    for id in 0..6 {
        assert!(lab.inject_ready(lab_handle(id)));
    }
    assert!(wait_until(WAIT, || (0..6).all(|id| armed_in(&pool, id, 0))));
    assert_eq!(pool.group_stats(0).map(|g| g.connection_count), Some(6));
    assert_eq!(pool.group_stats(1).map(|g| g.connection_count), Some(0));
    assert_eq!(pool.group_stats(2).map(|g| g.connection_count), Some(0));

    test_section!("new connections use the new count");
    pool.add(lab_connection(10)).expect("add");
    assert!(wait_until(WAIT, || armed_in(&pool, 10, 0)));

    assert!(pool.shutdown(WAIT));
    test_complete!("shrinking_moves_connections_back");
}

#[test]
fn resize_out_of_range_is_rejected() {
    init_test_logging();
    test_phase!("resize_out_of_range_is_rejected");
    let (builder, _lab) = lab_builder(2);
    let pool = builder.build(Arc::new(Recorder::rearming())).expect("pool");
    let max = pool.max_groups();
    let err = pool.resize(max + 1).expect_err("beyond capacity");
    assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    assert_eq!(pool.group_count(), 2);
    assert!(pool.shutdown(WAIT));
    let err = pool.resize(2).expect_err("after shutdown");
    assert!(err.is_shutdown());
    test_complete!("resize_out_of_range_is_rejected");
}
