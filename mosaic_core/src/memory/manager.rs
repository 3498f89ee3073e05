//! The memory-manager seam: allocate, register and release local slots.

use std::sync::Arc;

use crate::error::{MosaicError, MosaicResult};
use crate::memory::local_slot::LocalMemorySlot;
use crate::topology::MemorySpace;

/// Backend seam for local memory-slot management.
///
/// The provided methods carry the usage accounting and release bookkeeping
/// that every backend shares; implementations fill in the `*_impl` hooks for
/// their allocation technology.
///
/// Allocation failure is reported, never silently retried. Releasing the
/// same slot twice is a logic fault and aborts.
pub trait MemoryManager: Send + Sync {
    /// Allocate a slot of `size` bytes in `memory_space`. The slot owns its
    /// allocation. Fails with `OutOfMemory` when the space cannot satisfy
    /// the request.
    fn allocate_local_memory_slot(
        &self,
        memory_space: &Arc<MemorySpace>,
        size: usize,
    ) -> MosaicResult<Arc<LocalMemorySlot>> {
        memory_space
            .increase_usage(size as u64)
            .map_err(|_| MosaicError::OutOfMemory {
                space: memory_space.space_type().to_string(),
                requested: size as u64,
                available: memory_space.size() - memory_space.usage(),
            })?;
        match self.allocate_local_memory_slot_impl(memory_space, size) {
            Ok(slot) => Ok(slot),
            Err(err) => {
                memory_space.decrease_usage(size as u64);
                Err(err)
            }
        }
    }

    /// Adopt an externally-allocated region as a slot. Free semantics mirror
    /// allocation: the region is deregistered, never freed.
    ///
    /// The region must stay valid until the slot is deregistered.
    fn register_local_memory_slot(
        &self,
        memory_space: &Arc<MemorySpace>,
        ptr: *mut u8,
        size: usize,
    ) -> MosaicResult<Arc<LocalMemorySlot>> {
        memory_space
            .increase_usage(size as u64)
            .map_err(|_| MosaicError::OutOfMemory {
                space: memory_space.space_type().to_string(),
                requested: size as u64,
                available: memory_space.size() - memory_space.usage(),
            })?;
        match self.register_local_memory_slot_impl(memory_space, ptr, size) {
            Ok(slot) => Ok(slot),
            Err(err) => {
                memory_space.decrease_usage(size as u64);
                Err(err)
            }
        }
    }

    /// Free a slot previously obtained from `allocate_local_memory_slot`.
    /// The descriptor must not be used after this returns.
    fn free_local_memory_slot(&self, slot: &Arc<LocalMemorySlot>) -> MosaicResult<()> {
        slot.mark_released();
        if let Some(space) = slot.memory_space() {
            space.decrease_usage(slot.size() as u64);
        }
        self.free_local_memory_slot_impl(slot)
    }

    /// Deregister a slot previously obtained from
    /// `register_local_memory_slot`. The underlying region is untouched.
    fn deregister_local_memory_slot(&self, slot: &Arc<LocalMemorySlot>) -> MosaicResult<()> {
        slot.mark_released();
        if let Some(space) = slot.memory_space() {
            space.decrease_usage(slot.size() as u64);
        }
        self.deregister_local_memory_slot_impl(slot)
    }

    /// Fill the first `min(size, slot.size)` bytes of the slot with `value`
    fn memset(&self, slot: &Arc<LocalMemorySlot>, value: u8, size: usize) -> MosaicResult<()> {
        slot.ensure_live()?;
        let count = size.min(slot.size());
        unsafe { std::ptr::write_bytes(slot.pointer(), value, count) };
        Ok(())
    }

    fn allocate_local_memory_slot_impl(
        &self,
        memory_space: &Arc<MemorySpace>,
        size: usize,
    ) -> MosaicResult<Arc<LocalMemorySlot>>;

    fn register_local_memory_slot_impl(
        &self,
        memory_space: &Arc<MemorySpace>,
        ptr: *mut u8,
        size: usize,
    ) -> MosaicResult<Arc<LocalMemorySlot>>;

    fn free_local_memory_slot_impl(&self, slot: &Arc<LocalMemorySlot>) -> MosaicResult<()>;

    fn deregister_local_memory_slot_impl(&self, slot: &Arc<LocalMemorySlot>) -> MosaicResult<()>;
}
