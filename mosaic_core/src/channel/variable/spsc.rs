//! Single-producer single-consumer channel, variable-size messages.
//!
//! The payload buffer, sizes buffer and the consumer's two coordination
//! buffers live at the consumer. The producer writes the payload (wrapping
//! around the end of the payload buffer when needed), writes one size entry,
//! advances its local heads and mirrors both head cells to the consumer.
//! Pops mirror both tail cells back to the producer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::Backoff;

use crate::channel::variable::{Base, SIZE_ENTRY_BYTES};
use crate::channel::{
    COORDINATION_CELL_SIZE, HEAD_ADVANCE_COUNT_OFFSET, TAIL_ADVANCE_COUNT_OFFSET,
};
use crate::comm::CommunicationManager;
use crate::error::{MosaicError, MosaicResult};
use crate::memory::{GlobalMemorySlot, LocalMemorySlot, Slot};

/// Producer endpoint of a variable-size SPSC channel
pub struct Producer {
    base: Base,
    size_info_buffer: Arc<LocalMemorySlot>,
    payload_buffer: Arc<GlobalMemorySlot>,
    sizes_buffer: Arc<GlobalMemorySlot>,
    consumer_coordination_for_counts: Arc<GlobalMemorySlot>,
    consumer_coordination_for_payloads: Arc<GlobalMemorySlot>,
}

impl Producer {
    /// Build the producer endpoint.
    ///
    /// `size_info_buffer` is a producer-local slot of at least one size
    /// entry, used to stage the size of the message being pushed. The two
    /// coordination slots are the producer's own, zero-initialized; the two
    /// consumer coordination references receive the head mirrors.
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

    /// Put one message onto the channel; its size is the source slot's size.
    ///
    /// Fails with `WouldOverflow` when the sizes ring is full or the payload
    /// ring lacks `source.size()` free bytes. The payload write wraps around
    /// the end of the payload buffer when needed.
    pub fn push(&mut self, source: &Arc<LocalMemorySlot>) -> MosaicResult<()> {
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

        self.update_depth()?;

        if self.base.counts_ring().is_full() {
            return Err(MosaicError::WouldOverflow {
                requested: 1,
                depth: self.base.depth(),
                capacity: self.base.capacity() as u64,
            });
        }
        let payload_depth = self.base.payload_depth();
        if payload_depth + size as u64 > self.base.payload_capacity() as u64 {
            return Err(MosaicError::WouldOverflow {
                requested: size as u64,
                depth: payload_depth,
                capacity: self.base.payload_capacity() as u64,
            });
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

        // One size entry at the sizes-ring head
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

        self.base.payload_ring().advance_head(size as u64);
        self.base.counts_ring().advance_head(1);

        // Mirror both head cells to the consumer. The payloads cell goes
        // first: the consumer gates on the counts cell, so by the time it
        // observes a new message the payload head must already be visible.
        self.base.comm().memcpy(
            Slot::global(&self.consumer_coordination_for_payloads),
            HEAD_ADVANCE_COUNT_OFFSET,
            Slot::local(self.base.coordination_for_payloads()),
            HEAD_ADVANCE_COUNT_OFFSET,
            COORDINATION_CELL_SIZE,
        )?;
        self.base.comm().memcpy(
            Slot::global(&self.consumer_coordination_for_counts),
            HEAD_ADVANCE_COUNT_OFFSET,
            Slot::local(self.base.coordination_for_counts()),
            HEAD_ADVANCE_COUNT_OFFSET,
            COORDINATION_CELL_SIZE,
        )?;

        self.base.comm().flush()
    }

    /// Loop on `push` until it succeeds, a transport error occurs, or the
    /// caller raises `cancel`
    pub fn push_wait(
        &mut self,
        source: &Arc<LocalMemorySlot>,
        cancel: &AtomicBool,
    ) -> MosaicResult<bool> {
        let backoff = Backoff::new();
        loop {
            match self.push(source) {
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

    /// Refresh both rings from the consumer's pop updates
    pub fn update_depth(&mut self) -> MosaicResult<()> {
        self.base
            .comm()
            .query_memory_slot_updates(&Slot::local(self.base.coordination_for_counts()))?;
        self.base
            .comm()
            .query_memory_slot_updates(&Slot::local(self.base.coordination_for_payloads()))
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

/// Consumer endpoint of a variable-size SPSC channel
pub struct Consumer {
    base: Base,
    payload_buffer: Arc<GlobalMemorySlot>,
    sizes_buffer: Arc<GlobalMemorySlot>,
    producer_coordination_for_counts: Arc<GlobalMemorySlot>,
    producer_coordination_for_payloads: Arc<GlobalMemorySlot>,
}

impl Consumer {
    /// Build the consumer endpoint over its own buffers (`payload_buffer`
    /// and `sizes_buffer` are the global handles of consumer-owned slots)
    /// and the producer's coordination references for tail mirroring.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        comm: Arc<dyn CommunicationManager>,
        payload_buffer: Arc<GlobalMemorySlot>,
        sizes_buffer: Arc<GlobalMemorySlot>,
        coordination_for_counts: Arc<LocalMemorySlot>,
        coordination_for_payloads: Arc<LocalMemorySlot>,
        producer_coordination_for_counts: Arc<GlobalMemorySlot>,
        producer_coordination_for_payloads: Arc<GlobalMemorySlot>,
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
        if let Some(source) = payload_buffer.source_local_memory_slot() {
            if source.size() < payload_capacity {
                return Err(MosaicError::logic(format!(
                    "payload buffer ({}) smaller than the payload capacity ({})",
                    source.size(),
                    payload_capacity
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
            producer_coordination_for_counts,
            producer_coordination_for_payloads,
        })
    }

    /// Size entry at the given sizes-ring position
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

    /// Pump the backend for head mirrors pushed by the producer
    pub fn update_depth(&mut self) -> MosaicResult<()> {
        self.base
            .comm()
            .query_memory_slot_updates(&Slot::global(&self.sizes_buffer))?;
        self.base
            .comm()
            .query_memory_slot_updates(&Slot::local(self.base.coordination_for_counts()))?;
        self.base
            .comm()
            .query_memory_slot_updates(&Slot::local(self.base.coordination_for_payloads()))
    }

    /// `[offset, length]` of the next message within the payload buffer.
    ///
    /// A message may wrap: when `offset + length` exceeds the payload
    /// capacity the remainder continues at offset zero.
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

    /// Remove the oldest message, advancing both rings, and mirror both
    /// tail cells to the producer
    pub fn pop(&mut self) -> MosaicResult<()> {
        self.update_depth()?;
        if self.base.is_empty() {
            return Err(MosaicError::WouldUnderflow {
                requested: 1,
                depth: 0,
            });
        }
        let size = self.size_at(self.base.counts_ring().tail_position())?;

        self.base.counts_ring().advance_tail(1);
        self.base.payload_ring().advance_tail(size as u64);

        self.base.comm().memcpy(
            Slot::global(&self.producer_coordination_for_counts),
            TAIL_ADVANCE_COUNT_OFFSET,
            Slot::local(self.base.coordination_for_counts()),
            TAIL_ADVANCE_COUNT_OFFSET,
            COORDINATION_CELL_SIZE,
        )?;
        self.base.comm().memcpy(
            Slot::global(&self.producer_coordination_for_payloads),
            TAIL_ADVANCE_COUNT_OFFSET,
            Slot::local(self.base.coordination_for_payloads()),
            TAIL_ADVANCE_COUNT_OFFSET,
            COORDINATION_CELL_SIZE,
        )?;

        Ok(())
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
