//! The public [`Comm`] handle (§6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{JoinHandle, Thread};

use crate::config::Config;
use crate::error::CommError;
use crate::flush::{background_loop, flush_once, RoundTracker};
use crate::recv::{ReceiveBuffer, RoundRobin};
use crate::transport::{Channel, Transport};
use crate::window::GroupPair;

/// A comm handle for one peer in a fixed-size group (§6).
///
/// Application threads call [`Comm::send`] to stage messages and [`Comm::receive`] /
/// [`Comm::receive_any`] to drain them; a background thread drives periodic flushes and a
/// distributed termination protocol so [`Comm::close`] (or dropping the handle) can join it
/// cleanly.
pub struct Comm {
    rank: usize,
    size: usize,
    config: Config,
    groups: Arc<GroupPair>,
    recv_buffers: Arc<Vec<ReceiveBuffer>>,
    round_robin: RoundRobin,
    transport: Arc<dyn Transport>,
    flush_mutex: Arc<Mutex<()>>,
    outer_mutex: Arc<Mutex<()>>,
    local_done: Arc<AtomicBool>,
    rounds: Arc<RoundTracker>,
    flusher: Mutex<Option<JoinHandle<Result<(), CommError>>>>,
    buzzer: Thread,
}

impl Comm {
    /// Initializes a comm handle over `transport`, whose `rank()`/`size()` fix this peer's
    /// identity and the group's cardinality, and spawns the background flusher (§6 `new`).
    pub fn new(transport: Arc<dyn Transport>, config: Config) -> Result<Self, CommError> {
        let rank = transport.rank();
        let size = transport.size();
        config.validate(size)?;

        let groups = Arc::new(GroupPair::new(size, config.window_bytes, config.element_size)?);
        let recv_buffers = Arc::new((0..size).map(|_| ReceiveBuffer::new()).collect());
        let flush_mutex = Arc::new(Mutex::new(()));
        let outer_mutex = Arc::new(Mutex::new(()));
        let local_done = Arc::new(AtomicBool::new(false));
        let rounds = Arc::new(RoundTracker::new());

        let handle = {
            let groups = Arc::clone(&groups);
            let transport = Arc::clone(&transport);
            let recv_buffers = Arc::clone(&recv_buffers);
            let flush_mutex = Arc::clone(&flush_mutex);
            let outer_mutex = Arc::clone(&outer_mutex);
            let local_done = Arc::clone(&local_done);
            let rounds = Arc::clone(&rounds);
            let element_size = config.element_size;
            let reclaim_after = config.reclaim_after;
            let flush_interval = config.flush_interval;
            std::thread::Builder::new()
                .name(format!("groupcomm-flusher-{rank}"))
                .spawn(move || {
                    let result = background_loop(
                        groups,
                        transport,
                        recv_buffers,
                        element_size,
                        reclaim_after,
                        flush_interval,
                        flush_mutex,
                        outer_mutex,
                        local_done,
                        Arc::clone(&rounds),
                        size,
                        rank,
                    );
                    rounds.mark_stopped();
                    result
                })
                .map_err(|e| {
                    CommError::FatalInitFailure(format!("failed to spawn background flusher: {e}"))
                })?
        };
        let buzzer = handle.thread().clone();

        Ok(Comm {
            rank,
            size,
            config,
            groups,
            recv_buffers,
            round_robin: RoundRobin::new(),
            transport,
            flush_mutex,
            outer_mutex,
            local_done,
            rounds,
            flusher: Mutex::new(Some(handle)),
            buzzer,
        })
    }

    /// This peer's rank in `[0, size())`.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// The group's cardinality.
    pub fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn groups(&self) -> &GroupPair {
        &self.groups
    }

    /// Requests a swap/exchange/scatter/reset round on the internal channel (§4.2) and blocks
    /// until one completes.
    ///
    /// This does not issue its own collective: the internal channel's `all_to_all_counts` /
    /// `all_to_all_v` pair is driven only by the background flusher, paired every round with
    /// its termination `all_reduce_sum` so the two collectives never fall out of step across
    /// peers (see [`crate::flush::RoundTracker`]). `flush` just wakes the flusher early and
    /// waits for the round it wakes to land.
    pub fn flush(&self) -> Result<(), CommError> {
        let start = self.rounds.current();
        self.buzzer.unpark();
        self.rounds.wait_past(start)
    }

    /// Flushes the internal channel until no local data remains pending, then blocks on a
    /// collective barrier over the external channel (§4.5).
    pub fn barrier(&self) -> Result<(), CommError> {
        loop {
            let idx = self.groups.current_index();
            let pending: usize = self.groups.group(idx).lengths_snapshot().into_iter().sum();
            if pending == 0 {
                break;
            }
            self.flush()?;
        }
        self.transport.barrier(Channel::External)
    }

    /// Performs a single swap/exchange/scatter/reset round on the external channel, mixing a
    /// flush into a barrier-style synchronization point without a separate collective call
    /// (§4.5).
    pub fn barrier_flush(&self) -> Result<(), CommError> {
        let _outer = self.outer_mutex.lock().unwrap();
        let _inner = self.flush_mutex.lock().unwrap();
        flush_once(
            &self.groups,
            self.transport.as_ref(),
            Channel::External,
            &self.recv_buffers,
            self.config.element_size,
            self.config.reclaim_after,
            self.rank,
        )
    }

    /// Non-blocking dequeue of the next whole message from `source`, or `None` if none is
    /// buffered yet (§4.4).
    pub fn receive(&self, source: usize) -> Option<Vec<u8>> {
        self.recv_buffers
            .get(source)
            .and_then(|b| b.try_receive(self.config.element_size))
    }

    /// Non-blocking dequeue of the next whole message from any source, round-robining past
    /// whichever source the last call returned from (§4.4 any-source `receive`).
    ///
    /// Concurrent callers race on the shared cursor: each message is still delivered to
    /// exactly one caller, but which caller receives it, and from which source, is not
    /// specified under concurrent use — call `receive(source)` directly if that matters.
    pub fn receive_any(&self) -> Option<(usize, Vec<u8>)> {
        self.round_robin.receive_any(&self.recv_buffers, self.config.element_size)
    }

    /// Signals termination and waits for the background flusher to exit (§4.6). Idempotent:
    /// safe to call more than once, and invoked again from `Drop` if it hasn't run yet.
    pub fn close(&self) -> Result<(), CommError> {
        self.local_done.store(true, Ordering::Release);
        self.buzzer.unpark();
        let handle = self.flusher.lock().unwrap().take();
        match handle {
            Some(handle) => handle.join().map_err(|_| {
                CommError::FatalTransportFailure("background flusher thread panicked".into())
            })?,
            None => Ok(()),
        }
    }
}

impl Drop for Comm {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
