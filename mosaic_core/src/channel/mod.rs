//! # Channels
//!
//! Fixed-size and variable-size SPSC and MPSC queues built on memory slots
//! and one-sided memcpy. A channel's only shared mutable state is its
//! coordination buffer: a two-cell array of unsigned 64-bit counters that a
//! remote peer can advance with a single cell-sized write.
//!
//! Channel endpoints are plain values; each endpoint belongs to exactly one
//! thread of its peer. Push, pop and the progress pumps are non-blocking;
//! the blocking `push_wait` variant is a loop over `push` with back-off and
//! a caller-provided cancellation flag.

pub mod circular;
pub mod fixed;
pub mod variable;

use std::sync::Arc;

use crate::error::{MosaicError, MosaicResult};
use crate::memory::LocalMemorySlot;

pub use circular::CircularBuffer;

/// Element type of coordination-buffer cells
pub type CoordinationCell = u64;

/// Size in bytes of one coordination cell
pub const COORDINATION_CELL_SIZE: usize = std::mem::size_of::<CoordinationCell>();

/// Cell index of the head advance count (total tokens ever pushed)
pub const HEAD_ADVANCE_COUNT_IDX: usize = 0;

/// Cell index of the tail advance count (total tokens ever popped)
pub const TAIL_ADVANCE_COUNT_IDX: usize = 1;

/// Byte offset of the head advance count within a coordination buffer
pub const HEAD_ADVANCE_COUNT_OFFSET: usize = HEAD_ADVANCE_COUNT_IDX * COORDINATION_CELL_SIZE;

/// Byte offset of the tail advance count within a coordination buffer
pub const TAIL_ADVANCE_COUNT_OFFSET: usize = TAIL_ADVANCE_COUNT_IDX * COORDINATION_CELL_SIZE;

/// Required size of a coordination buffer (two cells)
pub const fn coordination_buffer_size() -> usize {
    2 * COORDINATION_CELL_SIZE
}

/// Required size of a token buffer for `capacity` tokens of `token_size`
pub const fn token_buffer_size(token_size: usize, capacity: usize) -> usize {
    token_size * capacity
}

/// Zero both cells of a coordination buffer slot.
///
/// Must be called by the buffer's owner before the slot is exchanged and
/// any channel endpoint is built over it.
pub fn initialize_coordination_buffer(slot: &Arc<LocalMemorySlot>) -> MosaicResult<()> {
    slot.ensure_live()?;
    if slot.size() < coordination_buffer_size() {
        return Err(MosaicError::logic(format!(
            "coordination buffer size ({}) smaller than the required size ({})",
            slot.size(),
            coordination_buffer_size()
        )));
    }
    unsafe { std::ptr::write_bytes(slot.pointer(), 0, coordination_buffer_size()) };
    Ok(())
}

/// Global-key namespace reserved by channels inside their exchange tag
pub mod keys {
    use crate::memory::GlobalKey;

    // Fixed-size channels
    pub const TOKEN_BUFFER_KEY: GlobalKey = 0;
    pub const CONSUMER_COORDINATION_BUFFER_KEY: GlobalKey = 1;
    pub const PRODUCER_COORDINATION_BUFFER_KEY: GlobalKey = 2;

    // Variable-size channels
    pub const SIZES_BUFFER_KEY: GlobalKey = 0;
    pub const CONSUMER_PAYLOAD_KEY: GlobalKey = 1;
    pub const CONSUMER_COORDINATION_BUFFER_FOR_SIZES_KEY: GlobalKey = 2;
    pub const CONSUMER_COORDINATION_BUFFER_FOR_PAYLOADS_KEY: GlobalKey = 3;
    pub const PRODUCER_COORDINATION_BUFFER_FOR_SIZES_KEY: GlobalKey = 4;
    pub const PRODUCER_COORDINATION_BUFFER_FOR_PAYLOADS_KEY: GlobalKey = 5;
}
