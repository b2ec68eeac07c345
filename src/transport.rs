//! The collective transport seam this crate is written against (§6 "Transport contract").
//!
//! The transport itself — an MPI-style set of collective primitives shared by a fixed-size
//! process group — is an external collaborator; standing one up across real processes is out
//! of scope for this crate. What lives here is the trait the comm core programs against, plus
//! one concrete in-process implementation, [`thread::ThreadTransport`], used by the test suite
//! and the `demos/` binaries in place of a real multi-process transport.

pub mod thread;

use crate::error::CommError;

/// Distinguishes the background flusher's collectives from an application-issued
/// `barrier`/`barrier_flush`, so the two never interleave on the same underlying
/// communicator (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Driven by the background flusher (§4.6).
    Internal,
    /// Driven by an explicit `barrier`/`barrier_flush` call (§4.5).
    External,
}

/// The collective primitives a [`crate::Comm`] requires from the underlying transport (§6).
///
/// `rank`/`size` identify this peer within the group; the remaining methods are blocking
/// collectives every peer in the group must call, in the same order, for any one of them to
/// return.
pub trait Transport: Send + Sync {
    /// This peer's rank, in `[0, size())`.
    fn rank(&self) -> usize;

    /// The group's cardinality.
    fn size(&self) -> usize;

    /// Every peer provides an element count destined for every other peer, on `channel`, and
    /// learns how many elements it is about to receive from each peer in turn.
    fn all_to_all_counts(
        &self,
        channel: Channel,
        send_counts: &[usize],
    ) -> Result<Vec<usize>, CommError>;

    /// Variable-length all-to-all exchange on `channel`. `send_chunks[i]` is the (already
    /// element-padded) bytes this peer is sending to peer `i`; the returned vector's `i`-th
    /// entry is the bytes this peer received from peer `i`.
    fn all_to_all_v(
        &self,
        channel: Channel,
        send_chunks: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, CommError>;

    /// Sums `value` across every peer on `channel`, returning the identical total to all of
    /// them.
    fn all_reduce_sum(&self, channel: Channel, value: i64) -> Result<i64, CommError>;

    /// Blocks until every peer has called `barrier` on `channel`.
    fn barrier(&self, channel: Channel) -> Result<(), CommError>;
}
