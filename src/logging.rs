//! Structured logging at the flush/exchange/termination lifecycle boundaries (§10.4), in the
//! spirit of the teacher's `communication::logging` (`CommunicationSetup`/`CommunicationEvent`)
//! but re-expressed as `tracing` spans and events rather than a bespoke logging sink.

use serde::{Deserialize, Serialize};

use crate::transport::Channel;

/// Identifies a comm instance for log correlation, analogous to `CommunicationSetup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommSetup {
    /// This peer's rank.
    pub rank: usize,
    /// The group's cardinality.
    pub size: usize,
}

pub(crate) fn log_swap(rank: usize, drained_group: usize, peers: usize) {
    tracing::debug!(rank, drained_group, peers, "send group swapped; now draining");
}

pub(crate) fn log_exchange(rank: usize, channel: Channel, sent_elems: usize, recv_elems: usize) {
    tracing::trace!(rank, ?channel, sent_elems, recv_elems, "collective exchange complete");
}

pub(crate) fn log_reclaim(rank: usize, group: usize) {
    tracing::debug!(rank, group, "send window reclaimed after idle period");
}

pub(crate) fn log_termination_round(rank: usize, num_peers_done: usize, peers: usize) {
    tracing::trace!(rank, num_peers_done, peers, "termination reduction round");
}
