//! The flush engine (§4.2) and the background flusher's termination protocol (§4.6).
//!
//! The internal channel's collectives (`all_to_all_counts`/`all_to_all_v` paired with
//! `all_reduce_sum`) are driven *only* by the background flusher, never by an application
//! thread directly: every peer's background loop performs the same flush-then-reduce pair
//! every round, so the two collectives stay in lockstep across peers no matter how many
//! times an application calls `Comm::flush` to request one. An explicit `flush()` instead
//! wakes the background flusher early and waits for it to complete a round — see
//! [`RoundTracker`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::CommError;
use crate::logging;
use crate::recv::ReceiveBuffer;
use crate::transport::{Channel, Transport};
use crate::window::GroupPair;

/// Swap, collective exchange, scatter, and reset (§4.2). `channel` picks which transport
/// channel performs the exchange, so that a background-driven flush can never interleave
/// with an application-driven `barrier_flush` on the same communicator.
pub(crate) fn flush_once(
    pair: &GroupPair,
    transport: &dyn Transport,
    channel: Channel,
    recv_buffers: &[ReceiveBuffer],
    element_size: usize,
    reclaim_after: Duration,
    rank: usize,
) -> Result<(), CommError> {
    let old_counter = pair.swap();
    let drained_idx = old_counter & 1;
    let group = pair.group(drained_idx);

    while !group.is_drainable() {
        std::hint::spin_loop();
    }
    logging::log_swap(rank, drained_idx, recv_buffers.len());

    let chunks = group.slot_bytes_snapshot();
    let send_counts: Vec<usize> = chunks.iter().map(|c| c.len() / element_size).collect();
    let recv_counts = transport.all_to_all_counts(channel, &send_counts)?;
    let recv_runs = transport.all_to_all_v(channel, &chunks)?;
    logging::log_exchange(
        rank,
        channel,
        send_counts.iter().sum(),
        recv_counts.iter().sum(),
    );

    for (source, run) in recv_runs.into_iter().enumerate() {
        if !run.is_empty() {
            recv_buffers[source].insert(&run, element_size);
        }
    }

    group.reset();
    if group.maybe_reclaim(reclaim_after)? {
        logging::log_reclaim(rank, drained_idx);
    }

    Ok(())
}

struct RoundState {
    round: u64,
    stopped: bool,
}

/// Lets application threads wait for the background flusher to complete a round, instead of
/// issuing their own internal-channel collective.
///
/// The background flusher is the only caller of `flush_once` on the internal channel; every
/// iteration of its loop performs a flush (or a no-op skip, uniformly across peers) followed
/// by a termination `all_reduce_sum`. If `Comm::flush` issued its own standalone
/// `all_to_all_counts`/`all_to_all_v` pair instead of waiting here, a peer calling it would
/// pair that collective with another peer's background round while that other peer's
/// background thread moved on to its *own* next round's collectives or the reduce — two
/// different barriers, each short a peer, neither one ever releasing. Routing every explicit
/// flush through a wait on the background loop's own round counter keeps the flush-then-reduce
/// pair the only thing ever touching the internal channel, so it can never fall out of step.
pub(crate) struct RoundTracker {
    state: Mutex<RoundState>,
    condvar: Condvar,
}

impl RoundTracker {
    pub(crate) fn new() -> Self {
        RoundTracker {
            state: Mutex::new(RoundState { round: 0, stopped: false }),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn current(&self) -> u64 {
        self.state.lock().unwrap().round
    }

    fn advance(&self) {
        let mut state = self.state.lock().unwrap();
        state.round = state.round.wrapping_add(1);
        self.condvar.notify_all();
    }

    /// Marks the background flusher as exited, waking any waiter so it can stop blocking on a
    /// round that will now never arrive.
    pub(crate) fn mark_stopped(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        self.condvar.notify_all();
    }

    /// Blocks until the round counter advances past `start`, or the background flusher exits
    /// without reaching it.
    pub(crate) fn wait_past(&self, start: u64) -> Result<(), CommError> {
        let mut state = self.state.lock().unwrap();
        while state.round == start && !state.stopped {
            state = self.condvar.wait(state).unwrap();
        }
        if state.round != start {
            Ok(())
        } else {
            Err(CommError::FatalTransportFailure(
                "background flusher exited before completing the requested flush".into(),
            ))
        }
    }
}

/// The background flusher (§4.6): sleeps (or wakes early via the buzzer), drives a flush on
/// the internal channel, and joins a termination all-reduce every round until every peer
/// reports `local_done`.
///
/// `num_peers_done` is always the prior round's all-reduce result, identical across every
/// peer by construction, so every peer makes the same flush/skip decision each iteration —
/// this is what keeps the per-peer conditional flush below from ever stranding a peer at a
/// collective another peer isn't calling.
#[allow(clippy::too_many_arguments)]
pub(crate) fn background_loop(
    pair: Arc<GroupPair>,
    transport: Arc<dyn Transport>,
    recv_buffers: Arc<Vec<ReceiveBuffer>>,
    element_size: usize,
    reclaim_after: Duration,
    flush_interval: Duration,
    flush_mutex: Arc<Mutex<()>>,
    outer_mutex: Arc<Mutex<()>>,
    local_done: Arc<AtomicBool>,
    rounds: Arc<RoundTracker>,
    peers: usize,
    rank: usize,
) -> Result<(), CommError> {
    let mut num_peers_done = 0usize;
    while num_peers_done < peers {
        std::thread::park_timeout(flush_interval);

        let _outer = outer_mutex.lock().unwrap();
        if num_peers_done < peers {
            let _inner = flush_mutex.lock().unwrap();
            flush_once(
                &pair,
                transport.as_ref(),
                Channel::Internal,
                &recv_buffers,
                element_size,
                reclaim_after,
                rank,
            )?;
            rounds.advance();
        }

        let local = i64::from(local_done.load(Ordering::Acquire));
        let sum = transport.all_reduce_sum(Channel::Internal, local)?;
        num_peers_done = sum.max(0) as usize;
        logging::log_termination_round(rank, num_peers_done, peers);
    }
    Ok(())
}
