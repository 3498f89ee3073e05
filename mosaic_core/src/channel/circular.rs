//! Ring bookkeeping over two externally-stored cells.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::channel::{
    coordination_buffer_size, CoordinationCell, HEAD_ADVANCE_COUNT_IDX, TAIL_ADVANCE_COUNT_IDX,
};
use crate::error::{MosaicError, MosaicResult};
use crate::memory::LocalMemorySlot;

/// Ring-buffer logic over a coordination buffer's two cells.
///
/// The cells hold the monotone head and tail advance counts: total tokens
/// ever pushed and ever popped. Everything else derives from them:
/// `depth = head - tail`, `head position = head mod capacity`,
/// `tail position = tail mod capacity`. Because each cell is a single
/// 8-byte counter, a remote peer can advance the ring's state with one
/// cell-sized write, and the update stays consistent across wrap-around.
///
/// The buffer does not contain the tokens, only the access logic; storage
/// for the cells is provided by the caller and may be written remotely.
#[derive(Debug)]
pub struct CircularBuffer {
    capacity: u64,
    head_cell: NonNull<u64>,
    tail_cell: NonNull<u64>,
}

// The cells live inside a coordination slot kept alive by the owning
// channel endpoint; accesses are atomic.
unsafe impl Send for CircularBuffer {}

impl CircularBuffer {
    /// Build a ring over the two cells of `slot`.
    ///
    /// The slot must hold at least two 8-byte-aligned coordination cells.
    pub fn over_coordination_slot(
        capacity: usize,
        slot: &LocalMemorySlot,
    ) -> MosaicResult<Self> {
        if capacity == 0 {
            return Err(MosaicError::logic(
                "attempting to create a circular buffer with zero capacity",
            ));
        }
        if slot.size() < coordination_buffer_size() {
            return Err(MosaicError::logic(format!(
                "coordination buffer size ({}) smaller than the required size ({})",
                slot.size(),
                coordination_buffer_size()
            )));
        }
        let base = slot.pointer() as *mut CoordinationCell;
        if base as usize % std::mem::align_of::<CoordinationCell>() != 0 {
            return Err(MosaicError::logic(
                "coordination buffer is not 8-byte aligned",
            ));
        }
        Ok(Self {
            capacity: capacity as u64,
            head_cell: unsafe { NonNull::new_unchecked(base.add(HEAD_ADVANCE_COUNT_IDX)) },
            tail_cell: unsafe { NonNull::new_unchecked(base.add(TAIL_ADVANCE_COUNT_IDX)) },
        })
    }

    fn head_count(&self) -> u64 {
        unsafe { AtomicU64::from_ptr(self.head_cell.as_ptr()) }.load(Ordering::Acquire)
    }

    fn tail_count(&self) -> u64 {
        unsafe { AtomicU64::from_ptr(self.tail_cell.as_ptr()) }.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of tokens currently stored.
    ///
    /// Each cell is advanced by exactly one side of the channel, so a stale
    /// read of the remote cell only ever makes the result conservative for
    /// the reader (fuller for the producer, emptier for the consumer).
    pub fn depth(&self) -> u64 {
        let head = self.head_count();
        let tail = self.tail_count();
        // A remotely advanced head may be observed before the local tail
        // catches up in this thread's view; clamp rather than wrap.
        head.saturating_sub(tail)
    }

    /// Index of the cell one past the last stored token
    pub fn head_position(&self) -> u64 {
        self.head_count() % self.capacity
    }

    /// Index of the oldest stored token
    pub fn tail_position(&self) -> u64 {
        self.tail_count() % self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.depth() == self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// Record `n` pushed tokens. The head cannot advance such that depth
    /// exceeds capacity; that would be a bug in the channel layer.
    pub fn advance_head(&self, n: u64) {
        let depth = self.depth();
        assert!(
            depth + n <= self.capacity,
            "circular buffer depth ({} + {}) would exceed capacity ({}) on head advance",
            depth,
            n,
            self.capacity
        );
        unsafe { AtomicU64::from_ptr(self.head_cell.as_ptr()) }.fetch_add(n, Ordering::AcqRel);
    }

    /// Record `n` popped tokens. The tail cannot advance past the head;
    /// that would mean more tokens were consumed than produced.
    pub fn advance_tail(&self, n: u64) {
        let depth = self.depth();
        assert!(
            n <= depth,
            "circular buffer depth ({}) smaller than the number of tokens ({}) on tail advance",
            depth,
            n
        );
        unsafe { AtomicU64::from_ptr(self.tail_cell.as_ptr()) }.fetch_add(n, Ordering::AcqRel);
    }

    /// Overwrite the head advance count with an externally-observed total
    /// (a message-received counter). The count must not regress or exceed
    /// capacity over the current tail.
    pub fn set_head_count(&self, count: u64) {
        let tail = self.tail_count();
        assert!(
            count >= tail && count - tail <= self.capacity,
            "head count {} inconsistent with tail {} and capacity {}",
            count,
            tail,
            self.capacity
        );
        unsafe { AtomicU64::from_ptr(self.head_cell.as_ptr()) }.store(count, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::initialize_coordination_buffer;
    use std::sync::Arc;

    fn coordination_slot() -> (Arc<LocalMemorySlot>, Box<[u64; 2]>) {
        let mut cells = Box::new([0u64; 2]);
        let slot = Arc::new(LocalMemorySlot::from_registered_region(
            cells.as_mut_ptr() as *mut u8,
            16,
            None,
        ));
        initialize_coordination_buffer(&slot).unwrap();
        (slot, cells)
    }

    #[test]
    fn starts_empty() {
        let (slot, _cells) = coordination_slot();
        let ring = CircularBuffer::over_coordination_slot(4, &slot).unwrap();
        assert!(ring.is_empty());
        assert!(!ring.is_full());
        assert_eq!(ring.depth(), 0);
        assert_eq!(ring.head_position(), 0);
        assert_eq!(ring.tail_position(), 0);
    }

    #[test]
    fn head_and_tail_wrap() {
        let (slot, _cells) = coordination_slot();
        let ring = CircularBuffer::over_coordination_slot(4, &slot).unwrap();

        ring.advance_head(4);
        assert!(ring.is_full());
        assert_eq!(ring.head_position(), 0);

        ring.advance_tail(3);
        assert_eq!(ring.depth(), 1);
        assert_eq!(ring.tail_position(), 3);

        ring.advance_head(2);
        assert_eq!(ring.depth(), 3);
        assert_eq!(ring.head_position(), 2);

        ring.advance_tail(3);
        assert!(ring.is_empty());
        assert_eq!(ring.tail_position(), 2);
    }

    #[test]
    fn depth_stays_within_bounds_across_wraps() {
        let (slot, _cells) = coordination_slot();
        let ring = CircularBuffer::over_coordination_slot(3, &slot).unwrap();
        for _ in 0..10 {
            ring.advance_head(3);
            assert_eq!(ring.depth(), 3);
            ring.advance_tail(3);
            assert_eq!(ring.depth(), 0);
        }
    }

    #[test]
    fn set_head_count_tracks_received_messages() {
        let (slot, _cells) = coordination_slot();
        let ring = CircularBuffer::over_coordination_slot(4, &slot).unwrap();
        ring.set_head_count(2);
        assert_eq!(ring.depth(), 2);
        ring.advance_tail(2);
        ring.set_head_count(5);
        assert_eq!(ring.depth(), 3);
    }

    #[test]
    #[should_panic(expected = "exceed capacity")]
    fn overfull_head_advance_is_a_bug() {
        let (slot, _cells) = coordination_slot();
        let ring = CircularBuffer::over_coordination_slot(2, &slot).unwrap();
        ring.advance_head(3);
    }

    #[test]
    #[should_panic(expected = "tail advance")]
    fn tail_past_head_is_a_bug() {
        let (slot, _cells) = coordination_slot();
        let ring = CircularBuffer::over_coordination_slot(2, &slot).unwrap();
        ring.advance_head(1);
        ring.advance_tail(2);
    }

    #[test]
    fn rejects_undersized_coordination_slots() {
        let mut cell = 0u64;
        let slot = LocalMemorySlot::from_registered_region(&mut cell as *mut u64 as *mut u8, 8, None);
        assert!(CircularBuffer::over_coordination_slot(4, &slot).is_err());
    }
}
