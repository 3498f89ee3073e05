//! Fixed-size channels: every token has the same size.

pub mod mpsc_locking;
pub mod mpsc_nonlocking;
pub mod spsc;

use std::sync::Arc;

use crate::channel::CircularBuffer;
use crate::comm::CommunicationManager;
use crate::error::{MosaicError, MosaicResult};
use crate::memory::LocalMemorySlot;

/// Shared layout of all fixed-size channel endpoints: the communication
/// manager, the endpoint's own coordination buffer and the ring over it.
pub struct Base {
    comm: Arc<dyn CommunicationManager>,
    coordination_buffer: Arc<LocalMemorySlot>,
    ring: CircularBuffer,
    token_size: usize,
    capacity: usize,
}

impl Base {
    pub(crate) fn new(
        comm: Arc<dyn CommunicationManager>,
        coordination_buffer: Arc<LocalMemorySlot>,
        token_size: usize,
        capacity: usize,
    ) -> MosaicResult<Self> {
        if token_size == 0 {
            return Err(MosaicError::logic(
                "attempting to create a channel with token size 0",
            ));
        }
        if capacity == 0 {
            return Err(MosaicError::logic(
                "attempting to create a channel with zero capacity",
            ));
        }
        let ring = CircularBuffer::over_coordination_slot(capacity, &coordination_buffer)?;
        Ok(Self {
            comm,
            coordination_buffer,
            ring,
            token_size,
            capacity,
        })
    }

    /// The size of the tokens in this channel; all tokens have the same size
    pub fn token_size(&self) -> usize {
        self.token_size
    }

    /// The maximum number of tokens the channel can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of tokens currently in the channel, as last observed
    pub fn depth(&self) -> u64 {
        self.ring.depth()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    pub(crate) fn comm(&self) -> &Arc<dyn CommunicationManager> {
        &self.comm
    }

    pub(crate) fn ring(&self) -> &CircularBuffer {
        &self.ring
    }

    pub(crate) fn coordination_buffer(&self) -> &Arc<LocalMemorySlot> {
        &self.coordination_buffer
    }
}
