//! Streams many fixed-size messages from rank 0 to every other peer and reports elapsed time.

use std::sync::Arc;
use std::time::Instant;

use groupcomm::transport::thread::ThreadTransport;
use groupcomm::{Comm, Config};

fn main() {
    tracing_subscriber::fmt::init();

    let size: usize = std::env::args().nth(1).and_then(|s| s.parse().ok()).unwrap_or(4);
    let messages: usize = std::env::args().nth(2).and_then(|s| s.parse().ok()).unwrap_or(10_000);

    let transports = ThreadTransport::new_group(size);
    let handles: Vec<_> = transports
        .into_iter()
        .map(|transport| {
            std::thread::spawn(move || {
                let comm = Comm::new(Arc::new(transport), Config::default()).unwrap();
                let payload = vec![0u8; 64];
                let start = Instant::now();

                if comm.rank() == 0 {
                    for target in 1..comm.size() {
                        for _ in 0..messages {
                            comm.send(target, &payload).unwrap();
                        }
                    }
                    comm.flush().unwrap();
                    println!("rank 0: staged {} messages per peer", messages);
                } else {
                    let mut received = 0;
                    while received < messages {
                        if comm.receive(0).is_some() {
                            received += 1;
                        } else {
                            comm.flush().unwrap();
                        }
                    }
                    let elapsed = start.elapsed();
                    println!(
                        "rank {}: received {} messages in {:?} ({:.0} msg/s)",
                        comm.rank(),
                        received,
                        elapsed,
                        received as f64 / elapsed.as_secs_f64()
                    );
                }

                comm.close().unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}
