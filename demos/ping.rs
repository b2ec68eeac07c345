//! Every peer sends one message to every other peer and waits to hear back from all of them.

use std::sync::Arc;

use groupcomm::transport::thread::ThreadTransport;
use groupcomm::{Comm, Config};

fn main() {
    tracing_subscriber::fmt::init();

    let size = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(4);

    let transports = ThreadTransport::new_group(size);
    let handles: Vec<_> = transports
        .into_iter()
        .map(|transport| {
            std::thread::spawn(move || {
                let comm = Comm::new(Arc::new(transport), Config::default()).unwrap();
                println!("worker {} of {} started", comm.rank(), comm.size());

                for target in 0..comm.size() {
                    comm.send(target, format!("hello, {}", target).as_bytes())
                        .unwrap();
                }
                comm.flush().unwrap();

                let mut received = 0;
                while received < comm.size() {
                    if let Some((source, message)) = comm.receive_any() {
                        println!(
                            "worker {}: received from {}: <{}>",
                            comm.rank(),
                            source,
                            String::from_utf8_lossy(&message)
                        );
                        received += 1;
                    } else {
                        comm.flush().unwrap();
                    }
                }

                comm.close().unwrap();
                comm.rank()
            })
        })
        .collect();

    for handle in handles {
        match handle.join() {
            Ok(rank) => println!("result: {rank}"),
            Err(_) => println!("error in computation"),
        }
    }
}
