//! Single-producer single-consumer channel, fixed-size tokens.
//!
//! The token buffer and the consumer's coordination buffer live at the
//! consumer and are promoted; the producer keeps its own coordination
//! buffer, whose tail cell the consumer advances remotely with a single
//! cell-sized write. In the other direction the producer signals progress
//! implicitly: one memcpy per pushed token raises the token buffer's
//! received-message counter, which the consumer folds into its head count.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::utils::Backoff;

use crate::channel::fixed::Base;
use crate::channel::{token_buffer_size, COORDINATION_CELL_SIZE, TAIL_ADVANCE_COUNT_OFFSET};
use crate::comm::CommunicationManager;
use crate::error::{MosaicError, MosaicResult};
use crate::memory::{GlobalMemorySlot, LocalMemorySlot, Slot};

/// Producer endpoint of a fixed-size SPSC channel
pub struct Producer {
    base: Base,
    token_buffer: Arc<GlobalMemorySlot>,
    producer_coordination: Arc<GlobalMemorySlot>,
}

impl Producer {
    /// Build the producer endpoint.
    ///
    /// `coordination_buffer` is the producer's own, zero-initialized
    /// coordination slot; `producer_coordination` is the global reference to
    /// that same slot, which the remote consumer writes pop updates into.
    pub fn new(
        comm: Arc<dyn CommunicationManager>,
        token_buffer: Arc<GlobalMemorySlot>,
        coordination_buffer: Arc<LocalMemorySlot>,
        producer_coordination: Arc<GlobalMemorySlot>,
        token_size: usize,
        capacity: usize,
    ) -> MosaicResult<Self> {
        let base = Base::new(comm, coordination_buffer, token_size, capacity)?;
        Ok(Self {
            base,
            token_buffer,
            producer_coordination,
        })
    }

    /// Put `n` token(s) onto the channel, read from `source`.
    ///
    /// Non-blocking: fails with `WouldOverflow` when the channel lacks the
    /// space, leaving the channel untouched. One memcpy is issued per token
    /// so that received-message counts stay one-per-token.
    pub fn push(&mut self, source: &Arc<LocalMemorySlot>, n: usize) -> MosaicResult<()> {
        let required = token_buffer_size(self.base.token_size(), n);
        if source.size() < required {
            return Err(MosaicError::logic(format!(
                "push source buffer size ({}) smaller than the required size ({} x {} = {})",
                source.size(),
                self.base.token_size(),
                n,
                required
            )));
        }

        self.update_depth()?;

        let depth = self.base.depth();
        if depth + n as u64 > self.base.capacity() as u64 {
            return Err(MosaicError::WouldOverflow {
                requested: n as u64,
                depth,
                capacity: self.base.capacity() as u64,
            });
        }

        let token_size = self.base.token_size();
        for i in 0..n {
            let destination_offset = token_size * self.base.ring().head_position() as usize;
            self.base.comm().memcpy(
                Slot::global(&self.token_buffer),
                destination_offset,
                Slot::local(source),
                i * token_size,
                token_size,
            )?;
            self.base.ring().advance_head(1);
        }

        self.base.comm().flush()
    }

    /// Loop on `push` until it succeeds, a transport error occurs, or the
    /// caller raises `cancel`. Returns whether the push went through.
    pub fn push_wait(
        &mut self,
        source: &Arc<LocalMemorySlot>,
        n: usize,
        cancel: &AtomicBool,
    ) -> MosaicResult<bool> {
        let backoff = Backoff::new();
        loop {
            match self.push(source, n) {
                Ok(()) => return Ok(true),
                Err(err) if err.is_capacity() => {
                    if cancel.load(Ordering::Acquire) {
                        return Ok(false);
                    }
                    backoff.snooze();
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Refresh the channel depth from the consumer's pop updates
    pub fn update_depth(&mut self) -> MosaicResult<()> {
        self.base
            .comm()
            .query_memory_slot_updates(&Slot::global(&self.producer_coordination))
    }

    pub fn token_size(&self) -> usize {
        self.base.token_size()
    }

    pub fn capacity(&self) -> usize {
        self.base.capacity()
    }

    pub fn depth(&self) -> u64 {
        self.base.depth()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.base.is_full()
    }
}

/// Consumer endpoint of a fixed-size SPSC channel
pub struct Consumer {
    base: Base,
    token_buffer: Arc<GlobalMemorySlot>,
    producer_coordination: Arc<GlobalMemorySlot>,
}

impl Consumer {
    /// Build the consumer endpoint over its own token and coordination
    /// buffers (`token_buffer` is the global handle of the consumer-owned
    /// slot) and the global reference to the producer's coordination buffer.
    pub fn new(
        comm: Arc<dyn CommunicationManager>,
        token_buffer: Arc<GlobalMemorySlot>,
        coordination_buffer: Arc<LocalMemorySlot>,
        producer_coordination: Arc<GlobalMemorySlot>,
        token_size: usize,
        capacity: usize,
    ) -> MosaicResult<Self> {
        if let Some(source) = token_buffer.source_local_memory_slot() {
            let required = token_buffer_size(token_size, capacity);
            if source.size() < required {
                return Err(MosaicError::logic(format!(
                    "token buffer size ({}) smaller than the required size ({})",
                    source.size(),
                    required
                )));
            }
        }
        let base = Base::new(comm, coordination_buffer, token_size, capacity)?;
        Ok(Self {
            base,
            token_buffer,
            producer_coordination,
        })
    }

    /// Fold newly received tokens into the channel depth
    pub fn update_depth(&mut self) -> MosaicResult<()> {
        self.base
            .comm()
            .query_memory_slot_updates(&Slot::global(&self.token_buffer))?;
        // One received message corresponds to one pushed token
        self.base
            .ring()
            .set_head_count(self.token_buffer.messages_recv());
        Ok(())
    }

    /// Index within the token buffer of the token `pos` places past the
    /// oldest one. `pos = 0` is the earliest token currently present.
    pub fn peek(&mut self, pos: usize) -> MosaicResult<usize> {
        if pos >= self.base.capacity() {
            return Err(MosaicError::logic(format!(
                "peek position ({}) beyond the channel capacity ({})",
                pos,
                self.base.capacity()
            )));
        }
        self.update_depth()?;
        if pos as u64 >= self.base.depth() {
            return Err(MosaicError::PeekOutOfRange {
                position: pos as u64,
                depth: self.base.depth(),
            });
        }
        Ok(((self.base.ring().tail_position() + pos as u64) % self.base.capacity() as u64) as usize)
    }

    /// Remove the oldest `n` token(s) and notify the producer of the freed
    /// space with a single tail-cell write.
    pub fn pop(&mut self, n: usize) -> MosaicResult<()> {
        if n > self.base.capacity() {
            return Err(MosaicError::logic(format!(
                "popping {} tokens exceeds the channel capacity ({})",
                n,
                self.base.capacity()
            )));
        }
        self.update_depth()?;
        if n as u64 > self.base.depth() {
            return Err(MosaicError::WouldUnderflow {
                requested: n as u64,
                depth: self.base.depth(),
            });
        }

        self.base.ring().advance_tail(n as u64);

        // Mirror the tail cell to the producer; a single cell-sized write
        // keeps the update atomic from the producer's viewpoint
        self.base.comm().memcpy(
            Slot::global(&self.producer_coordination),
            TAIL_ADVANCE_COUNT_OFFSET,
            Slot::local(self.base.coordination_buffer()),
            TAIL_ADVANCE_COUNT_OFFSET,
            COORDINATION_CELL_SIZE,
        )?;

        self.base
            .comm()
            .query_memory_slot_updates(&Slot::global(&self.token_buffer))
    }

    pub fn token_size(&self) -> usize {
        self.base.token_size()
    }

    pub fn capacity(&self) -> usize {
        self.base.capacity()
    }

    pub fn depth(&self) -> u64 {
        self.base.depth()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.base.is_full()
    }
}
