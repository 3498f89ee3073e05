//! Variable-size channels: every message carries its own byte length.
//!
//! A variable-size channel runs two rings in lockstep: one over message
//! counts (the sizes ring, token size = one 8-byte size entry) and one over
//! payload bytes. Each ring has its own two-cell coordination buffer.

pub mod mpsc_locking;
pub mod mpsc_nonlocking;
pub mod spsc;

use std::sync::Arc;

use crate::channel::CircularBuffer;
use crate::comm::CommunicationManager;
use crate::error::{MosaicError, MosaicResult};
use crate::memory::LocalMemorySlot;

/// Size in bytes of one entry of the sizes buffer
pub const SIZE_ENTRY_BYTES: usize = std::mem::size_of::<u64>();

/// Required size of a sizes buffer for `capacity` messages
pub const fn sizes_buffer_size(capacity: usize) -> usize {
    capacity * SIZE_ENTRY_BYTES
}

/// Shared layout of all variable-size channel endpoints: the endpoint's two
/// coordination buffers and the rings over them.
pub struct Base {
    comm: Arc<dyn CommunicationManager>,
    coordination_for_counts: Arc<LocalMemorySlot>,
    coordination_for_payloads: Arc<LocalMemorySlot>,
    counts_ring: CircularBuffer,
    payload_ring: CircularBuffer,
    capacity: usize,
    payload_capacity: usize,
}

impl Base {
    pub(crate) fn new(
        comm: Arc<dyn CommunicationManager>,
        coordination_for_counts: Arc<LocalMemorySlot>,
        coordination_for_payloads: Arc<LocalMemorySlot>,
        capacity: usize,
        payload_capacity: usize,
    ) -> MosaicResult<Self> {
        if capacity == 0 {
            return Err(MosaicError::logic(
                "attempting to create a channel with zero capacity",
            ));
        }
        if payload_capacity == 0 {
            return Err(MosaicError::logic(
                "attempting to create a channel with zero payload capacity",
            ));
        }
        let counts_ring = CircularBuffer::over_coordination_slot(capacity, &coordination_for_counts)?;
        let payload_ring =
            CircularBuffer::over_coordination_slot(payload_capacity, &coordination_for_payloads)?;
        Ok(Self {
            comm,
            coordination_for_counts,
            coordination_for_payloads,
            counts_ring,
            payload_ring,
            capacity,
            payload_capacity,
        })
    }

    /// The maximum number of messages the channel can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The maximum number of payload bytes the channel can hold
    pub fn payload_capacity(&self) -> usize {
        self.payload_capacity
    }

    /// The number of messages currently in the channel, as last observed
    pub fn depth(&self) -> u64 {
        self.counts_ring.depth()
    }

    /// The number of payload bytes currently in the channel
    pub fn payload_depth(&self) -> u64 {
        self.payload_ring.depth()
    }

    pub fn is_empty(&self) -> bool {
        self.counts_ring.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.counts_ring.is_full()
    }

    pub(crate) fn comm(&self) -> &Arc<dyn CommunicationManager> {
        &self.comm
    }

    pub(crate) fn counts_ring(&self) -> &CircularBuffer {
        &self.counts_ring
    }

    pub(crate) fn payload_ring(&self) -> &CircularBuffer {
        &self.payload_ring
    }

    pub(crate) fn coordination_for_counts(&self) -> &Arc<LocalMemorySlot> {
        &self.coordination_for_counts
    }

    pub(crate) fn coordination_for_payloads(&self) -> &Arc<LocalMemorySlot> {
        &self.coordination_for_payloads
    }
}
