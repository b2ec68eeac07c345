//! The double-buffered send window: two [`SendGroup`]s, each a fixed-capacity per-peer slab
//! with lock-free CAS length reservation, and the [`GroupPair`] selector that alternates
//! between them (§3 Send group, §4.1, §4.3).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use memmap2::MmapMut;

use crate::error::CommError;
use crate::frame::padded_len;

/// The send window's backing storage. Writes are expressed through raw pointers rather than
/// `&mut` borrows because many senders write into disjoint regions of the same allocation at
/// once; see the safety comment on `Sync` below.
struct RawWindow {
    cell: UnsafeCell<MmapMut>,
}

// SAFETY: concurrent calls to `write_at`/`zero_at` only ever touch disjoint byte ranges. The
// CAS protocol in `SendGroup::try_copy_in` reserves `[offset, offset+grant)` within one
// target's slot exclusively to the caller that won the compare-exchange, and different
// targets occupy disjoint slots entirely, so no two writers ever alias. `as_slice` and
// `remap`, which take an ordinary borrow of the whole buffer, are documented as only valid
// once the owning `SendGroup` is drainable, i.e. once no writer holds a live reference.
unsafe impl Sync for RawWindow {}

impl RawWindow {
    fn new(bytes: usize) -> Result<Self, CommError> {
        let mmap = MmapMut::map_anon(bytes)
            .map_err(|e| CommError::FatalInitFailure(format!("failed to map send window: {e}")))?;
        Ok(RawWindow { cell: UnsafeCell::new(mmap) })
    }

    /// # Safety
    /// `[offset, offset + bytes.len())` must be a range reserved exclusively to this call by
    /// the CAS protocol in [`SendGroup::try_copy_in`].
    unsafe fn write_at(&self, offset: usize, bytes: &[u8]) {
        let slice = &mut *self.cell.get();
        slice[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// # Safety
    /// Same precondition as [`Self::write_at`].
    unsafe fn zero_at(&self, offset: usize, len: usize) {
        let slice = &mut *self.cell.get();
        slice[offset..offset + len].fill(0);
    }

    /// Only valid once the owning group is drainable (no writer holds a reference).
    fn as_slice(&self) -> &[u8] {
        unsafe { &*self.cell.get() }
    }

    /// Only valid once the owning group is drainable.
    fn remap(&self, bytes: usize) -> Result<(), CommError> {
        let mmap = MmapMut::map_anon(bytes).map_err(|e| {
            CommError::FatalInitFailure(format!("failed to remap send window: {e}"))
        })?;
        unsafe {
            *self.cell.get() = mmap;
        }
        Ok(())
    }
}

/// One half of the double-buffered send state (§3 Send group).
///
/// Capacity is split evenly across peers at construction; each peer's slot is reserved
/// byte-by-byte via a CAS loop on an atomic length counter, and the group as a whole is
/// "drainable" once an `Arc` refcount shared between the engine and every in-flight writer
/// drops back to one.
pub(crate) struct SendGroup {
    window: RawWindow,
    lengths: Vec<AtomicUsize>,
    slot_offset: Vec<usize>,
    per_peer_capacity: usize,
    window_bytes: usize,
    refcount: Arc<()>,
    last_reclaim: Mutex<Instant>,
}

impl SendGroup {
    fn new(peers: usize, window_bytes: usize, element_size: usize) -> Result<Self, CommError> {
        let slot_size = window_bytes / peers;
        let per_peer_capacity = (slot_size / element_size) * element_size;
        let slot_offset = (0..peers).map(|i| i * slot_size).collect();
        Ok(SendGroup {
            window: RawWindow::new(window_bytes)?,
            lengths: (0..peers).map(|_| AtomicUsize::new(0)).collect(),
            slot_offset,
            per_peer_capacity,
            window_bytes,
            refcount: Arc::new(()),
            last_reclaim: Mutex::new(Instant::now()),
        })
    }

    pub(crate) fn per_peer_capacity(&self) -> usize {
        self.per_peer_capacity
    }

    /// Acquires a shared reference a writer must hold for the duration of a copy into this
    /// group.
    pub(crate) fn acquire(&self) -> Arc<()> {
        Arc::clone(&self.refcount)
    }

    /// True once the engine's own handle is the only one left, i.e. no writer is mid-copy.
    pub(crate) fn is_drainable(&self) -> bool {
        Arc::strong_count(&self.refcount) == 1
    }

    /// Length-reservation CAS (§4.1 step 2) plus the guarded copy (step 3). Reserves up to
    /// `padded_len(bytes.len(), element_size)` bytes of `target`'s slot and copies in as much
    /// of `bytes` as the grant covers, zero-filling any trailing padding. Returns the number
    /// of caller bytes consumed, or 0 if the slot is already full (the caller must flush and
    /// retry — not an error, see `CommError`'s docs on `SaturationStall`).
    pub(crate) fn try_copy_in(&self, target: usize, bytes: &[u8], element_size: usize) -> usize {
        let padded = padded_len(bytes.len(), element_size);
        let counter = &self.lengths[target];

        let (offset, grant) = loop {
            let old = counter.load(Ordering::Acquire);
            let grant = (self.per_peer_capacity - old).min(padded);
            if grant == 0 {
                return 0;
            }
            if counter
                .compare_exchange_weak(old, old + grant, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break (old, grant);
            }
        };

        let consumed = grant.min(bytes.len());
        let base = self.slot_offset[target] + offset;
        // SAFETY: the CAS above reserved `[offset, offset+grant)` of this target's slot
        // exclusively for this call.
        unsafe {
            self.window.write_at(base, &bytes[..consumed]);
            if grant > consumed {
                self.window.zero_at(base + consumed, grant - consumed);
            }
        }
        consumed
    }

    /// Per-peer staged byte counts. Only meaningful once the group is drainable.
    pub(crate) fn lengths_snapshot(&self) -> Vec<usize> {
        self.lengths.iter().map(|l| l.load(Ordering::Acquire)).collect()
    }

    /// Copies each peer's valid bytes out of the window. Only valid once the group is
    /// drainable.
    pub(crate) fn slot_bytes_snapshot(&self) -> Vec<Vec<u8>> {
        let slice = self.window.as_slice();
        self.lengths_snapshot()
            .into_iter()
            .enumerate()
            .map(|(i, len)| slice[self.slot_offset[i]..self.slot_offset[i] + len].to_vec())
            .collect()
    }

    /// Zeroes every length counter after a successful drain, making the group available to
    /// writers again.
    pub(crate) fn reset(&self) {
        for l in &self.lengths {
            l.store(0, Ordering::Release);
        }
    }

    /// Unmaps and remaps the window's backing memory if it has sat drained and idle for at
    /// least `reclaim_after` (§4.3), returning whether a reclaim happened. Only valid to call
    /// once the group is drainable (callers only invoke this right after `reset`).
    pub(crate) fn maybe_reclaim(&self, reclaim_after: Duration) -> Result<bool, CommError> {
        let mut last = self.last_reclaim.lock().unwrap();
        if last.elapsed() >= reclaim_after {
            self.window.remap(self.window_bytes)?;
            *last = Instant::now();
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// The two alternating send groups plus the monotonic current-group selector (§3).
pub(crate) struct GroupPair {
    groups: [SendGroup; 2],
    current: AtomicUsize,
}

impl GroupPair {
    pub(crate) fn new(peers: usize, window_bytes: usize, element_size: usize) -> Result<Self, CommError> {
        Ok(GroupPair {
            groups: [
                SendGroup::new(peers, window_bytes, element_size)?,
                SendGroup::new(peers, window_bytes, element_size)?,
            ],
            current: AtomicUsize::new(0),
        })
    }

    /// The index (0 or 1) of the group currently accepting writers.
    pub(crate) fn current_index(&self) -> usize {
        self.current.load(Ordering::Acquire) & 1
    }

    pub(crate) fn group(&self, index: usize) -> &SendGroup {
        &self.groups[index & 1]
    }

    /// Advances the selector by one. The value it held *before* this call, `& 1`, names the
    /// group now frozen to new writers and ready to drain once it becomes unique.
    pub(crate) fn swap(&self) -> usize {
        self.current.fetch_add(1, Ordering::AcqRel)
    }
}

/// Stages `bytes` into the currently selected send group, honoring the group-(re)acquisition
/// double-check from §4.1 step 1: if the selector moved between acquiring the group and
/// confirming it, the acquired reference is dropped and the whole attempt retried against
/// whichever group is current now.
pub(crate) fn stage_bytes(pair: &GroupPair, target: usize, bytes: &[u8], element_size: usize) -> usize {
    loop {
        let idx = pair.current_index();
        let group = pair.group(idx);
        let _guard = group.acquire();
        if pair.current_index() != idx {
            continue;
        }
        return group.try_copy_in(target, bytes, element_size);
    }
}
