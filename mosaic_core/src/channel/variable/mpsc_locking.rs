//! Multiple-producer single-consumer channel, variable-size messages,
//! locking variant.
//!
//! Producers share the consumer's payload, sizes and coordination buffers.
//! A pushing producer acquires the global lock on the consumer's counts
//! coordination buffer, pulls both coordination states into local copies,
//! pushes if both rings have room, mirrors both states back and releases.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::Backoff;

use crate::channel::variable::{Base, SIZE_ENTRY_BYTES};
use crate::channel::coordination_buffer_size;
use crate::comm::CommunicationManager;
use crate::error::{MosaicError, MosaicResult};
use crate::memory::{GlobalMemorySlot, LocalMemorySlot, Slot};

/// Producer endpoint of a variable-size locking MPSC channel
pub struct Producer {
    base: Base,
    size_info_buffer: Arc<LocalMemorySlot>,
    payload_buffer: Arc<GlobalMemorySlot>,
    sizes_buffer: Arc<GlobalMemorySlot>,
    consumer_coordination_for_counts: Arc<GlobalMemorySlot>,
    consumer_coordination_for_payloads: Arc<GlobalMemorySlot>,
}

impl Producer {
    /// Build a producer endpoint. The two coordination slots are local
    /// scratch copies of the channel state, private to this producer.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        comm: Arc<dyn CommunicationManager>,
        size_info_buffer: Arc<LocalMemorySlot>,
        payload_buffer: Arc<GlobalMemorySlot>,
        sizes_buffer: Arc<GlobalMemorySlot>,
        coordination_for_counts: Arc<LocalMemorySlot>,
        coordination_for_payloads: Arc<LocalMemorySlot>,
        consumer_coordination_for_counts: Arc<GlobalMemorySlot>,
        consumer_coordination_for_payloads: Arc<GlobalMemorySlot>,
        capacity: usize,
        payload_capacity: usize,
    ) -> MosaicResult<Self> {
        if size_info_buffer.size() < SIZE_ENTRY_BYTES {
            return Err(MosaicError::logic(format!(
                "size-info buffer ({}) smaller than one size entry ({})",
                size_info_buffer.size(),
                SIZE_ENTRY_BYTES
            )));
        }
        let base = Base::new(
            comm,
            coordination_for_counts,
            coordination_for_payloads,
            capacity,
            payload_capacity,
        )?;
        Ok(Self {
            base,
            size_info_buffer,
            payload_buffer,
            sizes_buffer,
            consumer_coordination_for_counts,
            consumer_coordination_for_payloads,
        })
    }

    /// Try to put one message onto the channel; its size is the source
    /// slot's size.
    ///
    /// Returns `Ok(false)` without retry when the lock is contended or
    /// either ring lacks room.
    pub fn push(&mut self, source: &Arc<LocalMemorySlot>) -> MosaicResult<bool> {
        let size = source.size();
        if size == 0 {
            return Err(MosaicError::logic("attempting to push an empty message"));
        }
        if size > self.base.payload_capacity() {
            return Err(MosaicError::logic(format!(
                "message size ({}) exceeds the payload capacity ({})",
                size,
                self.base.payload_capacity()
            )));
        }

        if !self
            .base
            .comm()
            .acquire_global_lock(&self.consumer_coordination_for_counts)?
        {
            return Ok(false);
        }

        let result = self.push_locked(source, size);
        self.base
            .comm()
            .release_global_lock(&self.consumer_coordination_for_counts)?;
        result
    }

    fn push_locked(&mut self, source: &Arc<LocalMemorySlot>, size: usize) -> MosaicResult<bool> {
        // Pull both coordination states into the local copies
        self.base.comm().memcpy(
            Slot::local(self.base.coordination_for_counts()),
            0,
            Slot::global(&self.consumer_coordination_for_counts),
            0,
            coordination_buffer_size(),
        )?;
        self.base.comm().memcpy(
            Slot::local(self.base.coordination_for_payloads()),
            0,
            Slot::global(&self.consumer_coordination_for_payloads),
            0,
            coordination_buffer_size(),
        )?;
        self.base.comm().flush()?;

        if self.base.counts_ring().is_full()
            || self.base.payload_depth() + size as u64 > self.base.payload_capacity() as u64
        {
            return Ok(false);
        }

        // Payload, possibly split across the wrap point
        let head_byte = self.base.payload_ring().head_position() as usize;
        let first = size.min(self.base.payload_capacity() - head_byte);
        self.base.comm().memcpy(
            Slot::global(&self.payload_buffer),
            head_byte,
            Slot::local(source),
            0,
            first,
        )?;
        if first < size {
            self.base.comm().memcpy(
                Slot::global(&self.payload_buffer),
                0,
                Slot::local(source),
                first,
                size - first,
            )?;
        }

        unsafe {
            AtomicU64::from_ptr(self.size_info_buffer.pointer() as *mut u64)
                .store(size as u64, Ordering::Release)
        };
        self.base.comm().memcpy(
            Slot::global(&self.sizes_buffer),
            self.base.counts_ring().head_position() as usize * SIZE_ENTRY_BYTES,
            Slot::local(&self.size_info_buffer),
            0,
            SIZE_ENTRY_BYTES,
        )?;
        self.base.comm().flush()?;

        self.base.payload_ring().advance_head(size as u64);
        self.base.counts_ring().advance_head(1);

        // Mirror both updated states back to the consumer
        self.base.comm().memcpy(
            Slot::global(&self.consumer_coordination_for_counts),
            0,
            Slot::local(self.base.coordination_for_counts()),
            0,
            coordination_buffer_size(),
        )?;
        self.base.comm().memcpy(
            Slot::global(&self.consumer_coordination_for_payloads),
            0,
            Slot::local(self.base.coordination_for_payloads()),
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
        cancel: &AtomicBool,
    ) -> MosaicResult<bool> {
        let backoff = Backoff::new();
        while !self.push(source)? {
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
            .query_memory_slot_updates(&Slot::global(&self.consumer_coordination_for_counts))
    }

    pub fn capacity(&self) -> usize {
        self.base.capacity()
    }

    pub fn payload_capacity(&self) -> usize {
        self.base.payload_capacity()
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

/// Consumer endpoint of a variable-size locking MPSC channel.
///
/// The rings live directly over the consumer's shared coordination buffers;
/// producers update them remotely under the lock.
pub struct Consumer {
    base: Base,
    payload_buffer: Arc<GlobalMemorySlot>,
    sizes_buffer: Arc<GlobalMemorySlot>,
    consumer_coordination_for_counts: Arc<GlobalMemorySlot>,
}

impl Consumer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        comm: Arc<dyn CommunicationManager>,
        payload_buffer: Arc<GlobalMemorySlot>,
        sizes_buffer: Arc<GlobalMemorySlot>,
        coordination_for_counts: Arc<LocalMemorySlot>,
        coordination_for_payloads: Arc<LocalMemorySlot>,
        consumer_coordination_for_counts: Arc<GlobalMemorySlot>,
        capacity: usize,
        payload_capacity: usize,
    ) -> MosaicResult<Self> {
        if let Some(source) = sizes_buffer.source_local_memory_slot() {
            let required = capacity * SIZE_ENTRY_BYTES;
            if source.size() < required {
                return Err(MosaicError::logic(format!(
                    "sizes buffer ({}) smaller than the required size ({})",
                    source.size(),
                    required
                )));
            }
        }
        let base = Base::new(
            comm,
            coordination_for_counts,
            coordination_for_payloads,
            capacity,
            payload_capacity,
        )?;
        Ok(Self {
            base,
            payload_buffer,
            sizes_buffer,
            consumer_coordination_for_counts,
        })
    }

    fn size_at(&self, position: u64) -> MosaicResult<usize> {
        let source = self
            .sizes_buffer
            .source_local_memory_slot()
            .ok_or_else(|| MosaicError::logic("sizes buffer is not locally backed"))?;
        let cell = unsafe {
            (source.pointer() as *const u64).add(position as usize) as *mut u64
        };
        Ok(unsafe { AtomicU64::from_ptr(cell) }.load(Ordering::Acquire) as usize)
    }

    /// Pump the backend for coordination updates pushed by producers
    pub fn update_depth(&mut self) -> MosaicResult<()> {
        self.base
            .comm()
            .query_memory_slot_updates(&Slot::global(&self.sizes_buffer))?;
        self.base
            .comm()
            .query_memory_slot_updates(&Slot::local(self.base.coordination_for_counts()))
    }

    /// `[offset, length]` of the next message within the payload buffer
    pub fn peek(&mut self) -> MosaicResult<[usize; 2]> {
        self.update_depth()?;
        if self.base.is_empty() {
            return Err(MosaicError::PeekOutOfRange {
                position: 0,
                depth: 0,
            });
        }
        let size = self.size_at(self.base.counts_ring().tail_position())?;
        Ok([self.base.payload_ring().tail_position() as usize, size])
    }

    /// Try to remove the oldest message under the coordination lock.
    ///
    /// Returns `Ok(false)` when the lock is contended or the channel is
    /// empty.
    pub fn pop(&mut self) -> MosaicResult<bool> {
        if !self
            .base
            .comm()
            .acquire_global_lock(&self.consumer_coordination_for_counts)?
        {
            return Ok(false);
        }

        let popped = if self.base.is_empty() {
            false
        } else {
            let size = self.size_at(self.base.counts_ring().tail_position())?;
            self.base.counts_ring().advance_tail(1);
            self.base.payload_ring().advance_tail(size as u64);
            true
        };

        self.base
            .comm()
            .release_global_lock(&self.consumer_coordination_for_counts)?;
        Ok(popped)
    }

    /// Copy the next message's bytes out of the payload buffer, following
    /// the wrap when there is one
    pub fn peek_bytes(&mut self) -> MosaicResult<Vec<u8>> {
        let [offset, length] = self.peek()?;
        let source = self
            .payload_buffer
            .source_local_memory_slot()
            .ok_or_else(|| MosaicError::logic("payload buffer is not locally backed"))?;
        let capacity = self.base.payload_capacity();
        let mut bytes = Vec::with_capacity(length);
        let first = length.min(capacity - offset);
        unsafe {
            bytes.extend_from_slice(std::slice::from_raw_parts(
                source.pointer().add(offset),
                first,
            ));
            if first < length {
                bytes.extend_from_slice(std::slice::from_raw_parts(
                    source.pointer(),
                    length - first,
                ));
            }
        }
        Ok(bytes)
    }

    pub fn capacity(&self) -> usize {
        self.base.capacity()
    }

    pub fn payload_capacity(&self) -> usize {
        self.base.payload_capacity()
    }

    pub fn depth(&self) -> u64 {
        self.base.depth()
    }

    pub fn payload_depth(&self) -> u64 {
        self.base.payload_depth()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.base.is_full()
    }
}
