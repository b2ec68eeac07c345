//! End-to-end scenarios spawning one thread per rank over `ThreadTransport`.

use std::sync::Arc;
use std::time::Duration;

use groupcomm::transport::thread::ThreadTransport;
use groupcomm::{Comm, Config};

fn spawn_group<F, T>(size: usize, config: Config, body: F) -> Vec<T>
where
    F: Fn(Comm) -> T + Send + Sync + Clone + 'static,
    T: Send + 'static,
{
    let transports = ThreadTransport::new_group(size);
    let handles: Vec<_> = transports
        .into_iter()
        .map(|transport| {
            let config = config.clone();
            let body = body.clone();
            std::thread::spawn(move || {
                let comm = Comm::new(Arc::new(transport), config).unwrap();
                body(comm)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

/// Scenario 1: two peers, ping.
#[test]
fn scenario_two_peer_ping() {
    let results = spawn_group(2, Config::default(), |comm| {
        if comm.rank() == 0 {
            comm.send(1, b"hello").unwrap();
            comm.flush().unwrap();
            None
        } else {
            let mut received = None;
            while received.is_none() {
                received = comm.receive_any();
            }
            comm.close().unwrap();
            received
        }
    });

    let (source, payload) = results[1].clone().unwrap();
    assert_eq!(source, 0);
    assert_eq!(payload, b"hello");
}

/// Scenario 2: barrier timing — both peers call `barrier()` 100 times without hanging.
#[test]
fn scenario_barrier_timing() {
    spawn_group(2, Config::default(), |comm| {
        for _ in 0..100 {
            comm.barrier().unwrap();
        }
        comm.close().unwrap();
    });
}

/// Scenario 3 (scaled down from the literal 64 MiB sweep to keep the test fast): peer 0
/// sends chunks of geometrically increasing size, flushing after each; peer 1 checks every
/// message's length and fill byte.
#[test]
fn scenario_chunked_size_sweep() {
    let sizes: Vec<usize> = (4..14).map(|i: u32| 1usize << i).collect();
    let total_messages = sizes.len();

    let results = spawn_group(2, Config::default(), {
        let sizes = sizes.clone();
        move |comm| {
            if comm.rank() == 0 {
                for (i, &size) in sizes.iter().enumerate() {
                    let payload = vec![i as u8; size];
                    comm.send(1, &payload).unwrap();
                    comm.flush().unwrap();
                }
                None
            } else {
                let mut received = Vec::new();
                while received.len() < total_messages {
                    if let Some(payload) = comm.receive(0) {
                        received.push(payload);
                    } else {
                        comm.flush().unwrap();
                    }
                }
                comm.close().unwrap();
                Some(received)
            }
        }
    });

    let received = results[1].clone().unwrap();
    assert_eq!(received.len(), sizes.len());
    for (i, (payload, &size)) in received.iter().zip(sizes.iter()).enumerate() {
        assert_eq!(payload.len(), size);
        assert!(payload.iter().all(|&b| b == i as u8));
    }
}

/// Scenario 4: a small window forces multiple flushes to deliver one large message whole.
#[test]
fn scenario_small_slot_forces_multi_flush() {
    let config = Config {
        window_bytes: 4096,
        ..Config::default()
    };
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

    let results = spawn_group(4, config, {
        let payload = payload.clone();
        move |comm| {
            if comm.rank() == 0 {
                comm.send(1, &payload).unwrap();
                comm.flush().unwrap();
                None
            } else if comm.rank() == 1 {
                let mut received = None;
                while received.is_none() {
                    received = comm.receive(0);
                    if received.is_none() {
                        comm.flush().unwrap();
                    }
                }
                comm.close().unwrap();
                received
            } else {
                comm.close().unwrap();
                None
            }
        }
    });

    assert_eq!(results[1].as_ref().unwrap(), &payload);
}

/// Scenario 5: two producers send to the same target concurrently; each source's
/// sub-sequence at the target preserves that source's send order.
#[test]
fn scenario_multi_producer_single_target() {
    const COUNT: usize = 1_000;

    let results = spawn_group(3, Config::default(), |comm| {
        match comm.rank() {
            0 | 2 => {
                for i in 0..COUNT {
                    let payload = format!("rank{}-{:05}", comm.rank(), i);
                    comm.send(1, payload.as_bytes()).unwrap();
                }
                comm.flush().unwrap();
                None
            }
            1 => {
                let mut from0 = Vec::new();
                let mut from2 = Vec::new();
                while from0.len() < COUNT || from2.len() < COUNT {
                    if let Some(payload) = comm.receive(0) {
                        from0.push(String::from_utf8(payload).unwrap());
                    }
                    if let Some(payload) = comm.receive(2) {
                        from2.push(String::from_utf8(payload).unwrap());
                    }
                    if from0.len() < COUNT || from2.len() < COUNT {
                        comm.flush().unwrap();
                    }
                }
                comm.close().unwrap();
                Some((from0, from2))
            }
            _ => unreachable!(),
        }
    });

    let (from0, from2) = results[1].clone().unwrap();
    for (i, message) in from0.iter().enumerate() {
        assert_eq!(*message, format!("rank0-{i:05}"));
    }
    for (i, message) in from2.iter().enumerate() {
        assert_eq!(*message, format!("rank2-{i:05}"));
    }
}

/// Scenario 6: round-robin fairness — two concurrent single-message senders are both
/// observed, each exactly once, by two `receive_any` calls.
#[test]
fn scenario_round_robin_fairness() {
    let results = spawn_group(3, Config::default(), |comm| {
        match comm.rank() {
            0 => {
                comm.send(1, b"from 0").unwrap();
                comm.flush().unwrap();
                None
            }
            2 => {
                comm.send(1, b"from 2").unwrap();
                comm.flush().unwrap();
                None
            }
            1 => {
                let mut got = Vec::new();
                while got.len() < 2 {
                    if let Some(pair) = comm.receive_any() {
                        got.push(pair);
                    } else {
                        comm.flush().unwrap();
                    }
                }
                comm.close().unwrap();
                Some(got)
            }
            _ => unreachable!(),
        }
    });

    let mut got = results[1].clone().unwrap();
    got.sort_by_key(|(source, _)| *source);
    assert_eq!(got[0], (0, b"from 0".to_vec()));
    assert_eq!(got[1], (2, b"from 2".to_vec()));
}

/// P6: destroying the comm on every peer lets every background flusher exit cleanly.
#[test]
fn terminates_without_deadlock() {
    spawn_group(3, Config::default(), |comm| {
        comm.close().unwrap();
    });
}

/// P7: a drained group idle for at least `reclaim_after` gets its window reclaimed on the
/// next flush, and per-peer length accounting stays intact across the reclaim.
#[test]
fn reclaims_an_idle_window_without_losing_data() {
    let config = Config {
        reclaim_after: Duration::from_millis(20),
        ..Config::default()
    };

    let results = spawn_group(2, config, |comm| {
        if comm.rank() == 0 {
            comm.send(1, b"before reclaim").unwrap();
            comm.flush().unwrap();
            std::thread::sleep(Duration::from_millis(60));
            comm.send(1, b"after reclaim").unwrap();
            comm.flush().unwrap();
            None
        } else {
            let mut messages = Vec::new();
            while messages.len() < 2 {
                if let Some(payload) = comm.receive(0) {
                    messages.push(payload);
                } else {
                    comm.flush().unwrap();
                }
            }
            comm.close().unwrap();
            Some(messages)
        }
    });

    let messages = results[1].clone().unwrap();
    assert_eq!(messages[0], b"before reclaim");
    assert_eq!(messages[1], b"after reclaim");
}
