//! An in-process [`Transport`] over a fixed set of threads, realizing the all-to-all /
//! all-reduce / barrier contract with shared mailboxes and `std::sync::Barrier` rendezvous
//! instead of a real network (§10.1). This is what the test suite and the `demos/` binaries
//! run against in place of an actual multi-process MPI-style transport.

use std::sync::{Arc, Barrier, Mutex};

use crate::error::CommError;
use crate::transport::{Channel, Transport};

/// Shared mailboxes and rendezvous points backing one logical channel (internal or external).
///
/// Each collective has its own write/read barrier pair so that unrelated collectives (say,
/// a termination all-reduce racing an all-to-all-v from a different round) never share a
/// rendezvous generation. Within one collective, the read barrier is what prevents a fast
/// peer from overwriting round `k`'s mailbox before a slow peer has read it: no peer can
/// begin round `k+1`'s write until every peer has reached round `k`'s read barrier, which
/// requires every peer to have already performed round `k`'s read.
struct ChannelState {
    size: usize,
    counts: Mutex<Vec<Vec<usize>>>,
    data: Mutex<Vec<Vec<Vec<u8>>>>,
    reduce: Mutex<Vec<i64>>,
    counts_write: Barrier,
    counts_read: Barrier,
    data_write: Barrier,
    data_read: Barrier,
    reduce_write: Barrier,
    reduce_read: Barrier,
    plain: Barrier,
}

impl ChannelState {
    fn new(size: usize) -> Self {
        ChannelState {
            size,
            counts: Mutex::new(vec![Vec::new(); size]),
            data: Mutex::new(vec![Vec::new(); size]),
            reduce: Mutex::new(vec![0; size]),
            counts_write: Barrier::new(size),
            counts_read: Barrier::new(size),
            data_write: Barrier::new(size),
            data_read: Barrier::new(size),
            reduce_write: Barrier::new(size),
            reduce_read: Barrier::new(size),
            plain: Barrier::new(size),
        }
    }
}

/// One peer's handle onto a group of in-process mailboxes, analogous to one entry of
/// `allocator::process::Process::new_vector`'s returned channel table.
pub struct ThreadTransport {
    rank: usize,
    size: usize,
    internal: Arc<ChannelState>,
    external: Arc<ChannelState>,
}

impl ThreadTransport {
    /// Builds `size` transport handles, one per simulated peer, sharing the same internal
    /// and external channel state.
    pub fn new_group(size: usize) -> Vec<ThreadTransport> {
        let internal = Arc::new(ChannelState::new(size));
        let external = Arc::new(ChannelState::new(size));
        (0..size)
            .map(|rank| ThreadTransport {
                rank,
                size,
                internal: Arc::clone(&internal),
                external: Arc::clone(&external),
            })
            .collect()
    }

    fn channel(&self, channel: Channel) -> &ChannelState {
        match channel {
            Channel::Internal => &self.internal,
            Channel::External => &self.external,
        }
    }
}

impl Transport for ThreadTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_to_all_counts(
        &self,
        channel: Channel,
        send_counts: &[usize],
    ) -> Result<Vec<usize>, CommError> {
        let ch = self.channel(channel);
        if send_counts.len() != ch.size {
            return Err(CommError::InvalidArgument(format!(
                "send_counts has {} entries, expected {}",
                send_counts.len(),
                ch.size
            )));
        }
        {
            let mut counts = ch.counts.lock().unwrap();
            counts[self.rank] = send_counts.to_vec();
        }
        ch.counts_write.wait();
        let recv_counts = {
            let counts = ch.counts.lock().unwrap();
            (0..ch.size).map(|src| counts[src][self.rank]).collect()
        };
        ch.counts_read.wait();
        Ok(recv_counts)
    }

    fn all_to_all_v(
        &self,
        channel: Channel,
        send_chunks: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, CommError> {
        let ch = self.channel(channel);
        if send_chunks.len() != ch.size {
            return Err(CommError::InvalidArgument(format!(
                "send_chunks has {} entries, expected {}",
                send_chunks.len(),
                ch.size
            )));
        }
        {
            let mut data = ch.data.lock().unwrap();
            data[self.rank] = send_chunks.to_vec();
        }
        ch.data_write.wait();
        let recv_runs = {
            let data = ch.data.lock().unwrap();
            (0..ch.size).map(|src| data[src][self.rank].clone()).collect()
        };
        ch.data_read.wait();
        Ok(recv_runs)
    }

    fn all_reduce_sum(&self, channel: Channel, value: i64) -> Result<i64, CommError> {
        let ch = self.channel(channel);
        {
            let mut reduce = ch.reduce.lock().unwrap();
            reduce[self.rank] = value;
        }
        ch.reduce_write.wait();
        let sum = {
            let reduce = ch.reduce.lock().unwrap();
            reduce.iter().sum()
        };
        ch.reduce_read.wait();
        Ok(sum)
    }

    fn barrier(&self, channel: Channel) -> Result<(), CommError> {
        self.channel(channel).plain.wait();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_to_all_counts_delivers_each_peers_row() {
        let transports = ThreadTransport::new_group(3);
        let handles: Vec<_> = transports
            .into_iter()
            .map(|t| {
                std::thread::spawn(move || {
                    let send = vec![t.rank, t.rank + 1, t.rank + 2];
                    t.all_to_all_counts(Channel::Internal, &send).unwrap()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        // peer r's recv_counts[src] must equal src's send_counts[r]
        for r in 0..3 {
            for src in 0..3 {
                assert_eq!(results[r][src], src + r);
            }
        }
    }

    #[test]
    fn all_reduce_sum_matches_across_peers() {
        let transports = ThreadTransport::new_group(4);
        let handles: Vec<_> = transports
            .into_iter()
            .map(|t| {
                let value = t.rank as i64;
                std::thread::spawn(move || t.all_reduce_sum(Channel::External, value).unwrap())
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().all(|&s| s == 0 + 1 + 2 + 3));
    }
}
