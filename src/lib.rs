//! A collective point-to-point messaging layer over a process-group all-to-all transport.
//!
//! Each peer in a fixed-size group holds a [`Comm`] handle. Application threads call
//! [`Comm::send`] to enqueue a variable-length message for a target peer; a background
//! thread periodically drives a collective exchange (`Transport::all_to_all_v`) that
//! delivers everything staged so far; application threads call [`Comm::receive`] or
//! [`Comm::receive_any`] to drain whole messages back out of per-source queues.
//!
//! The transport itself — the MPI-style collective primitives a process group shares — is
//! pluggable via the [`Transport`] trait; this crate ships
//! [`transport::thread::ThreadTransport`], an in-process implementation suitable for tests
//! and the `demos/` binaries, in place of a real multi-process transport.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use groupcomm::{Comm, Config};
//! use groupcomm::transport::thread::ThreadTransport;
//!
//! let transports = ThreadTransport::new_group(2);
//! let handles: Vec<_> = transports
//!     .into_iter()
//!     .map(|transport| {
//!         std::thread::spawn(move || {
//!             let comm = Comm::new(Arc::new(transport), Config::default()).unwrap();
//!             if comm.rank() == 0 {
//!                 comm.send(1, b"hello").unwrap();
//!                 comm.flush().unwrap();
//!             } else {
//!                 let mut received = None;
//!                 while received.is_none() {
//!                     received = comm.receive(0);
//!                 }
//!                 assert_eq!(received.unwrap(), b"hello");
//!             }
//!             comm.close().unwrap();
//!         })
//!     })
//!     .collect();
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//! ```

mod comm;
mod config;
mod error;
mod flush;
mod frame;
mod logging;
mod recv;
mod send;
pub mod transport;
mod window;

pub use comm::Comm;
pub use config::Config;
pub use error::CommError;
pub use logging::CommSetup;
pub use transport::{Channel, Transport};
