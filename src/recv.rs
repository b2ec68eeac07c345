//! Per-source receive buffering and framed reassembly (§3 Receive buffer, §4.4).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::frame::{decode_header, padded_len, HEADER_SIZE};

struct ReceiveState {
    queue: VecDeque<u8>,
    buffered_len: usize,
    next_msg_len: usize,
    next_msg_padded_len: usize,
}

/// A byte FIFO plus header/payload framing state for one source peer.
///
/// Everything the framing state machine touches lives behind one mutex; `ready_hint` mirrors
/// "is a full message ready" so `try_receive` can skip the lock on the common case where it
/// isn't, without ever treating the hint itself as authoritative — the real decision is
/// always re-taken under the lock.
pub(crate) struct ReceiveBuffer {
    state: Mutex<ReceiveState>,
    ready_hint: AtomicBool,
}

impl ReceiveBuffer {
    pub(crate) fn new() -> Self {
        ReceiveBuffer {
            state: Mutex::new(ReceiveState {
                queue: VecDeque::new(),
                buffered_len: 0,
                next_msg_len: 0,
                next_msg_padded_len: 0,
            }),
            ready_hint: AtomicBool::new(false),
        }
    }

    /// Appends freshly scattered bytes from a flush and advances the framing state machine.
    pub(crate) fn insert(&self, bytes: &[u8], element_size: usize) {
        let mut state = self.state.lock().unwrap();
        state.queue.extend(bytes.iter().copied());
        state.buffered_len += bytes.len();
        Self::advance_framing(&mut state, element_size);
        self.publish_hint(&state);
    }

    /// If no header is currently staged and enough bytes are buffered, peels one off and
    /// computes the padded length to wait for next.
    fn advance_framing(state: &mut ReceiveState, element_size: usize) {
        if state.next_msg_len == 0 && state.buffered_len >= HEADER_SIZE {
            let header: Vec<u8> = state.queue.drain(..HEADER_SIZE).collect();
            state.buffered_len -= HEADER_SIZE;
            state.next_msg_len = decode_header(&header);
            state.next_msg_padded_len = padded_len(state.next_msg_len, element_size);
        }
    }

    fn publish_hint(&self, state: &ReceiveState) {
        let ready = state.next_msg_padded_len != 0 && state.next_msg_padded_len <= state.buffered_len;
        self.ready_hint.store(ready, Ordering::Release);
    }

    /// Non-blocking dequeue (§4.4 `receive(source)`). Returns `None` if no full message is
    /// buffered yet.
    pub(crate) fn try_receive(&self, element_size: usize) -> Option<Vec<u8>> {
        if !self.ready_hint.load(Ordering::Acquire) {
            return None;
        }
        let mut state = self.state.lock().unwrap();
        if state.next_msg_padded_len == 0 || state.next_msg_padded_len > state.buffered_len {
            self.publish_hint(&state);
            return None;
        }

        let padded = state.next_msg_padded_len;
        let length = state.next_msg_len;
        let mut payload: Vec<u8> = state.queue.drain(..padded).collect();
        payload.truncate(length);
        state.buffered_len -= padded;
        state.next_msg_len = 0;
        state.next_msg_padded_len = 0;

        Self::advance_framing(&mut state, element_size);
        self.publish_hint(&state);
        Some(payload)
    }
}

/// The rotating cursor backing source-agnostic `receive()` (§4.4).
pub(crate) struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub(crate) fn new() -> Self {
        RoundRobin { cursor: AtomicUsize::new(0) }
    }

    /// Probes each source at most once, starting just after the source the previous call
    /// returned from, and returns the first one with a complete message buffered.
    pub(crate) fn receive_any(
        &self,
        buffers: &[ReceiveBuffer],
        element_size: usize,
    ) -> Option<(usize, Vec<u8>)> {
        let peers = buffers.len();
        let start = self.cursor.load(Ordering::Acquire);
        for step in 1..=peers {
            let source = (start + step) % peers;
            if let Some(payload) = buffers[source].try_receive(element_size) {
                self.cursor.store(source, Ordering::Release);
                return Some((source, payload));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_header;

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut bytes = encode_header(payload.len()).to_vec();
        bytes.extend_from_slice(payload);
        let padded = padded_len(payload.len(), 8);
        bytes.resize(bytes.len() - payload.len() + padded, 0);
        bytes
    }

    #[test]
    fn reassembles_a_single_message_delivered_whole() {
        let buffer = ReceiveBuffer::new();
        buffer.insert(&framed(b"hello"), 8);
        assert_eq!(buffer.try_receive(8), Some(b"hello".to_vec()));
        assert_eq!(buffer.try_receive(8), None);
    }

    #[test]
    fn reassembles_a_message_split_across_multiple_inserts() {
        let buffer = ReceiveBuffer::new();
        let bytes = framed(b"a longer message than one element");
        let (first, second) = bytes.split_at(5);
        buffer.insert(first, 8);
        assert_eq!(buffer.try_receive(8), None);
        buffer.insert(second, 8);
        assert_eq!(
            buffer.try_receive(8),
            Some(b"a longer message than one element".to_vec())
        );
    }

    #[test]
    fn drains_back_to_back_messages_in_order() {
        let buffer = ReceiveBuffer::new();
        let mut bytes = framed(b"one");
        bytes.extend(framed(b"two"));
        buffer.insert(&bytes, 8);
        assert_eq!(buffer.try_receive(8), Some(b"one".to_vec()));
        assert_eq!(buffer.try_receive(8), Some(b"two".to_vec()));
        assert_eq!(buffer.try_receive(8), None);
    }

    #[test]
    fn round_robin_advances_past_the_last_source_served() {
        let buffers = vec![ReceiveBuffer::new(), ReceiveBuffer::new(), ReceiveBuffer::new()];
        buffers[0].insert(&framed(b"from 0"), 8);
        buffers[2].insert(&framed(b"from 2"), 8);
        let rr = RoundRobin::new();
        let (source, _) = rr.receive_any(&buffers, 8).unwrap();
        assert_eq!(source, 0);
        let (source, _) = rr.receive_any(&buffers, 8).unwrap();
        assert_eq!(source, 2);
        assert!(rr.receive_any(&buffers, 8).is_none());
    }
}
