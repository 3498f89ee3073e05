//! Host memory manager: cache-line-aligned allocations in host memory
//! spaces.

use std::alloc::Layout;
use std::sync::Arc;

use crate::error::{MosaicError, MosaicResult};
use crate::memory::{LocalMemorySlot, MemoryManager};
use crate::topology::MemorySpace;

// Coordination cells and token buffers share allocations with remote
// writers; cache-line alignment keeps cell-sized writes from straddling
// lines.
const SLOT_ALIGNMENT: usize = 64;

/// Memory manager over host memory spaces.
///
/// Allocations come from the global allocator, zeroed and 64-byte aligned;
/// registration adopts caller-owned regions (stack arrays, mapped segments)
/// without taking ownership.
#[derive(Debug, Default)]
pub struct HostMemoryManager;

impl HostMemoryManager {
    pub fn new() -> Self {
        Self
    }
}

impl MemoryManager for HostMemoryManager {
    fn allocate_local_memory_slot_impl(
        &self,
        memory_space: &Arc<MemorySpace>,
        size: usize,
    ) -> MosaicResult<Arc<LocalMemorySlot>> {
        let layout = Layout::from_size_align(size.max(1), SLOT_ALIGNMENT)
            .map_err(|err| MosaicError::logic(format!("invalid slot layout: {}", err)))?;
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(MosaicError::OutOfMemory {
                space: memory_space.space_type().to_string(),
                requested: size as u64,
                available: memory_space.size() - memory_space.usage(),
            });
        }
        Ok(Arc::new(unsafe {
            LocalMemorySlot::from_owned_allocation(ptr, layout, Arc::clone(memory_space))
        }))
    }

    fn register_local_memory_slot_impl(
        &self,
        memory_space: &Arc<MemorySpace>,
        ptr: *mut u8,
        size: usize,
    ) -> MosaicResult<Arc<LocalMemorySlot>> {
        if ptr.is_null() {
            return Err(MosaicError::logic(
                "attempting to register a null region as a memory slot",
            ));
        }
        Ok(Arc::new(LocalMemorySlot::from_registered_region(
            ptr,
            size,
            Some(Arc::clone(memory_space)),
        )))
    }

    fn free_local_memory_slot_impl(&self, slot: &Arc<LocalMemorySlot>) -> MosaicResult<()> {
        slot.deallocate();
        Ok(())
    }

    fn deregister_local_memory_slot_impl(&self, _slot: &Arc<LocalMemorySlot>) -> MosaicResult<()> {
        // The region is caller-owned; nothing to release
        Ok(())
    }
}
