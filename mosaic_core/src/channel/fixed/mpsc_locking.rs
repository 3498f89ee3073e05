//! Multiple-producer single-consumer channel, fixed-size tokens, locking
//! variant.
//!
//! All producers share one token buffer and one coordination buffer, both
//! owned by the consumer. A producer wishing to push acquires the global
//! lock on the consumer's coordination buffer, pulls the coordination state
//! into a local copy, pushes if there is room, mirrors the state back and
//! releases. The total order across producers is the lock-acquisition
//! order; within one critical section FIFO holds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::utils::Backoff;

use crate::channel::fixed::Base;
use crate::channel::{coordination_buffer_size, token_buffer_size};
use crate::comm::CommunicationManager;
use crate::error::{MosaicError, MosaicResult};
use crate::memory::{GlobalMemorySlot, LocalMemorySlot, Slot};

/// Producer endpoint of a fixed-size locking MPSC channel
pub struct Producer {
    base: Base,
    token_buffer: Arc<GlobalMemorySlot>,
    consumer_coordination: Arc<GlobalMemorySlot>,
}

impl Producer {
    /// Build a producer endpoint. `coordination_buffer` is a local scratch
    /// copy of the channel state, private to this producer;
    /// `consumer_coordination` is the shared, lockable coordination buffer
    /// at the consumer.
    pub fn new(
        comm: Arc<dyn CommunicationManager>,
        token_buffer: Arc<GlobalMemorySlot>,
        coordination_buffer: Arc<LocalMemorySlot>,
        consumer_coordination: Arc<GlobalMemorySlot>,
        token_size: usize,
        capacity: usize,
    ) -> MosaicResult<Self> {
        let base = Base::new(comm, coordination_buffer, token_size, capacity)?;
        Ok(Self {
            base,
            token_buffer,
            consumer_coordination,
        })
    }

    /// Try to put `n` token(s) onto the channel.
    ///
    /// Returns `Ok(false)` without retry when the consumer's coordination
    /// lock is contended or the channel lacks space; the caller spins or
    /// yields. The lock is never held across a blocking call.
    pub fn push(&mut self, source: &Arc<LocalMemorySlot>, n: usize) -> MosaicResult<bool> {
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

        if !self
            .base
            .comm()
            .acquire_global_lock(&self.consumer_coordination)?
        {
            return Ok(false);
        }

        // Everything below runs under the lock; release on every path.
        let result = self.push_locked(source, n);
        self.base
            .comm()
            .release_global_lock(&self.consumer_coordination)?;
        result
    }

    fn push_locked(&mut self, source: &Arc<LocalMemorySlot>, n: usize) -> MosaicResult<bool> {
        // Pull the current coordination state into the local copy
        self.base.comm().memcpy(
            Slot::local(self.base.coordination_buffer()),
            0,
            Slot::global(&self.consumer_coordination),
            0,
            coordination_buffer_size(),
        )?;
        self.base.comm().flush()?;

        let depth = self.base.depth();
        if depth + n as u64 > self.base.capacity() as u64 {
            return Ok(false);
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
        self.base.comm().flush()?;

        // Mirror the updated state back to the consumer
        self.base.comm().memcpy(
            Slot::global(&self.consumer_coordination),
            0,
            Slot::local(self.base.coordination_buffer()),
            0,
            coordination_buffer_size(),
        )?;
        self.base.comm().flush()?;

        Ok(true)
    }

    /// Loop on `push` until it succeeds, a transport error occurs, or the
    /// caller raises `cancel`
    pub fn push_wait(
        &mut self,
        source: &Arc<LocalMemorySlot>,
        n: usize,
        cancel: &AtomicBool,
    ) -> MosaicResult<bool> {
        let backoff = Backoff::new();
        while !self.push(source, n)? {
            if cancel.load(Ordering::Acquire) {
                return Ok(false);
            }
            backoff.snooze();
        }
        Ok(true)
    }

    /// Pump the backend; the producer's view of depth refreshes on the next
    /// locked pull
    pub fn update_depth(&mut self) -> MosaicResult<()> {
        self.base
            .comm()
            .query_memory_slot_updates(&Slot::global(&self.consumer_coordination))
    }

    pub fn token_size(&self) -> usize {
        self.base.token_size()
    }

    pub fn capacity(&self) -> usize {
        self.base.capacity()
    }

    /// Depth as of the last locked pull of the coordination state
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

/// Consumer endpoint of a fixed-size locking MPSC channel.
///
/// The ring lives directly over the consumer's shared coordination buffer;
/// producers update it remotely under the lock.
pub struct Consumer {
    base: Base,
    token_buffer: Arc<GlobalMemorySlot>,
    consumer_coordination: Arc<GlobalMemorySlot>,
}

impl Consumer {
    pub fn new(
        comm: Arc<dyn CommunicationManager>,
        token_buffer: Arc<GlobalMemorySlot>,
        coordination_buffer: Arc<LocalMemorySlot>,
        consumer_coordination: Arc<GlobalMemorySlot>,
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
            consumer_coordination,
        })
    }

    /// Pump the backend for coordination updates pushed by producers
    pub fn update_depth(&mut self) -> MosaicResult<()> {
        self.base
            .comm()
            .query_memory_slot_updates(&Slot::global(&self.consumer_coordination))
    }

    /// Index within the token buffer of the token `pos` places past the
    /// oldest one
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

    /// Try to remove the oldest `n` token(s).
    ///
    /// Returns `Ok(false)` when the coordination lock is contended or fewer
    /// than `n` tokens are present.
    pub fn pop(&mut self, n: usize) -> MosaicResult<bool> {
        if n > self.base.capacity() {
            return Err(MosaicError::logic(format!(
                "popping {} tokens exceeds the channel capacity ({})",
                n,
                self.base.capacity()
            )));
        }

        if !self
            .base
            .comm()
            .acquire_global_lock(&self.consumer_coordination)?
        {
            return Ok(false);
        }

        let popped = if n as u64 > self.base.depth() {
            false
        } else {
            self.base.ring().advance_tail(n as u64);
            true
        };

        self.base
            .comm()
            .release_global_lock(&self.consumer_coordination)?;
        Ok(popped)
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

    /// The shared token buffer, for reading peeked tokens
    pub fn token_buffer(&self) -> &Arc<GlobalMemorySlot> {
        &self.token_buffer
    }
}
