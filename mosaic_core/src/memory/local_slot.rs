//! Local memory slots: handles to contiguous buffers inside one memory space.

use std::alloc::Layout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{MosaicError, MosaicResult};
use crate::memory::counter::CounterCell;
use crate::topology::MemorySpace;

/// How the slot's bytes came to be
#[derive(Debug)]
enum Backing {
    /// The slot owns its allocation and releases it on free or drop
    Owned {
        layout: Layout,
        deallocated: AtomicBool,
    },
    /// The slot adopted an externally-allocated region; never freed here
    Registered,
}

/// A contiguous segment within a memory space of the local system.
///
/// Slots are created by a memory manager and must be released through the
/// same manager. The message counters are updated only by a communication
/// manager while the slot takes part in one-sided transfers; read them
/// after `query_memory_slot_updates` for an up-to-date value.
#[derive(Debug)]
pub struct LocalMemorySlot {
    ptr: *mut u8,
    size: usize,
    memory_space: Option<Arc<MemorySpace>>,
    messages_recv: CounterCell,
    messages_sent: CounterCell,
    backing: Backing,
    released: AtomicBool,
}

// One-sided access to the slot's bytes is coordinated by the communication
// manager and the channel protocols built on top; the descriptor itself is
// plain data.
unsafe impl Send for LocalMemorySlot {}
unsafe impl Sync for LocalMemorySlot {}

impl LocalMemorySlot {
    /// Build a slot that owns `ptr`, previously obtained from the global
    /// allocator with `layout`.
    ///
    /// # Safety
    ///
    /// `ptr` must point to at least `layout.size()` bytes allocated with
    /// `layout`, and ownership passes to the slot.
    pub unsafe fn from_owned_allocation(
        ptr: *mut u8,
        layout: Layout,
        memory_space: Arc<MemorySpace>,
    ) -> Self {
        Self {
            ptr,
            size: layout.size(),
            memory_space: Some(memory_space),
            messages_recv: CounterCell::new(),
            messages_sent: CounterCell::new(),
            backing: Backing::Owned {
                layout,
                deallocated: AtomicBool::new(false),
            },
            released: AtomicBool::new(false),
        }
    }

    /// Build a slot over an externally-owned region. The region must stay
    /// valid for the slot's lifetime; it is never freed here.
    pub fn from_registered_region(
        ptr: *mut u8,
        size: usize,
        memory_space: Option<Arc<MemorySpace>>,
    ) -> Self {
        Self {
            ptr,
            size,
            memory_space,
            messages_recv: CounterCell::new(),
            messages_sent: CounterCell::new(),
            backing: Backing::Registered,
            released: AtomicBool::new(false),
        }
    }

    pub fn pointer(&self) -> *mut u8 {
        self.ptr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn memory_space(&self) -> Option<&Arc<MemorySpace>> {
        self.memory_space.as_ref()
    }

    /// Number of one-sided transfers completed into this slot
    pub fn messages_recv(&self) -> u64 {
        self.messages_recv.get()
    }

    /// Number of one-sided transfers completed out of this slot
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.get()
    }

    pub(crate) fn messages_recv_cell(&self) -> &CounterCell {
        &self.messages_recv
    }

    pub(crate) fn messages_sent_cell(&self) -> &CounterCell {
        &self.messages_sent
    }

    /// Redirect both message counters to externally-mapped cells.
    ///
    /// # Safety
    ///
    /// See [`CounterCell::redirect`]; both targets must be distinct, 8-byte
    /// aligned, and outlive the slot.
    pub unsafe fn redirect_counters(&self, recv: *mut u64, sent: *mut u64) {
        self.messages_recv.redirect(recv);
        self.messages_sent.redirect(sent);
    }

    /// Mark the slot released by its manager. A second release is a
    /// double-free, which is a logic fault and aborts.
    pub(crate) fn mark_released(&self) {
        let was_released = self.released.swap(true, Ordering::AcqRel);
        assert!(!was_released, "double free of local memory slot");
    }

    pub(crate) fn ensure_live(&self) -> MosaicResult<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(MosaicError::logic("operation on a released memory slot"));
        }
        Ok(())
    }

    /// Return the owned allocation to the global allocator. No-op for
    /// registered slots.
    pub(crate) fn deallocate(&self) {
        if let Backing::Owned {
            layout,
            deallocated,
        } = &self.backing
        {
            if !deallocated.swap(true, Ordering::AcqRel) {
                unsafe { std::alloc::dealloc(self.ptr, *layout) };
            }
        }
    }
}

impl Drop for LocalMemorySlot {
    fn drop(&mut self) {
        self.deallocate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_slot_reports_its_region() {
        let mut storage = [0u8; 64];
        let space = Arc::new(MemorySpace::new("RAM", 1024));
        let slot =
            LocalMemorySlot::from_registered_region(storage.as_mut_ptr(), 64, Some(space));
        assert_eq!(slot.size(), 64);
        assert_eq!(slot.messages_recv(), 0);
        assert_eq!(slot.messages_sent(), 0);
        slot.ensure_live().unwrap();
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_release_aborts() {
        let mut storage = [0u8; 8];
        let slot = LocalMemorySlot::from_registered_region(storage.as_mut_ptr(), 8, None);
        slot.mark_released();
        slot.mark_released();
    }
}
