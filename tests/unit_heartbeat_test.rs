// tests/unit_heartbeat_test.rs

//! Heartbeat scheduling: exact cadence, interaction with real reads, and the
//! randomized many-connection scenario.

mod common;

use chronodb_net::DispatcherConfig;
use common::{TestProcessor, expected_heartbeat_ticks, shared_op_log, sim_fixture};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn config(heartbeat_interval: u64) -> DispatcherConfig {
    DispatcherConfig {
        heartbeat_interval,
        idle_timeout: 0,
        ..Default::default()
    }
}

#[test]
fn test_first_heartbeat_fires_one_tick_after_interval() {
    let h = 5;
    let mut fx = sim_fixture(config(h));
    let (socket, _peer) = fx.net.pair();
    fx.dispatcher.register_new_connection(socket).unwrap();

    let log = shared_op_log();
    let mut processor = TestProcessor::new(fx.clock.clone(), log.clone());
    for i in 0..60 {
        fx.tick(i, &mut processor);
    }

    let heartbeats = log.borrow().heartbeats.get(&0).cloned().unwrap_or_default();
    assert_eq!(heartbeats, expected_heartbeat_ticks(h, 59));
    // Spelled out: threshold detected at H, delivered at H + 1, then a fixed
    // two-tick overhead on every subsequent interval.
    assert_eq!(heartbeats[0], h + 1);
    for pair in heartbeats.windows(2) {
        assert_eq!(pair[1] - pair[0], h + 2);
    }
}

#[test]
fn test_read_resets_heartbeat_baseline() {
    let h = 5;
    let mut fx = sim_fixture(config(h));
    let (socket, peer) = fx.net.pair();
    fx.dispatcher.register_new_connection(socket).unwrap();

    let log = shared_op_log();
    let mut processor = TestProcessor::new(fx.clock.clone(), log.clone());
    let read_tick = 20;
    for i in 0..40 {
        if i == read_tick {
            peer.send(b".").unwrap();
        }
        fx.tick(i, &mut processor);
    }

    let log = log.borrow();
    assert_eq!(log.reads.get(&0).cloned().unwrap_or_default(), vec![read_tick]);
    // Heartbeats run on cadence until the read, which moves the next one to
    // R + H + 2. The read lands on a tick where a heartbeat was also due;
    // socket readiness wins and the heartbeat is re-derived from the read.
    assert_eq!(
        log.heartbeats.get(&0).cloned().unwrap_or_default(),
        vec![6, 13, read_tick + h + 2, read_tick + 2 * h + 4]
    );
}

#[test]
fn test_heartbeat_intervals_across_many_connections() {
    let h = 5;
    let connections = 25;
    let tick_count = 1000;

    let mut fx = sim_fixture(config(h));
    let mut peers = Vec::new();
    for _ in 0..connections {
        let (socket, peer) = fx.net.pair();
        fx.dispatcher.register_new_connection(socket).unwrap();
        peers.push(peer);
    }

    let log = shared_op_log();
    let mut processor = TestProcessor::new(fx.clock.clone(), log.clone());
    let mut rng = SmallRng::seed_from_u64(0xC0FFEE);
    for i in 0..tick_count {
        if i % 3 == 0 && rng.gen_bool(0.5) {
            let idx = rng.gen_range(0..peers.len());
            peers[idx].send(b".").unwrap();
        }
        fx.tick(i, &mut processor);
    }

    // The cadence invariant for every connection, interleaved with reads, is
    // asserted inside TestContext as each operation is delivered. Here we
    // only confirm every connection took part.
    let log = log.borrow();
    assert_eq!(fx.dispatcher.open_connections(), connections);
    for token in 0..connections {
        let beats = log.heartbeats.get(&token).cloned().unwrap_or_default();
        assert!(
            !beats.is_empty(),
            "connection {token} never received a heartbeat"
        );
    }
}

#[test]
fn test_heartbeats_disabled_with_zero_interval() {
    let mut fx = sim_fixture(config(0));
    let (socket, _peer) = fx.net.pair();
    fx.dispatcher.register_new_connection(socket).unwrap();

    let log = shared_op_log();
    let mut processor = TestProcessor::new(fx.clock.clone(), log.clone());
    for i in 0..100 {
        fx.tick(i, &mut processor);
    }

    assert!(log.borrow().heartbeats.is_empty());
    assert_eq!(fx.dispatcher.open_connections(), 1);
}
