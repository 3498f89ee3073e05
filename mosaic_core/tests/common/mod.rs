//! Shared wiring helpers for the channel and communication tests.
#![allow(dead_code)]

use std::sync::Arc;

use mosaic_core::backends::host::HostMemoryManager;
use mosaic_core::backends::shmem::ShmemCommunicationManager;
use mosaic_core::channel::initialize_coordination_buffer;
use mosaic_core::{LocalMemorySlot, MemoryManager, MemorySpace};

pub fn setup(
    peer_count: usize,
) -> (
    ShmemCommunicationManager,
    Arc<HostMemoryManager>,
    Arc<MemorySpace>,
) {
    (
        ShmemCommunicationManager::new(peer_count).unwrap(),
        Arc::new(HostMemoryManager::new()),
        Arc::new(MemorySpace::new("RAM", 16 << 20)),
    )
}

/// Allocate and zero a two-cell coordination buffer
pub fn coordination_slot(
    memory: &HostMemoryManager,
    space: &Arc<MemorySpace>,
) -> Arc<LocalMemorySlot> {
    let slot = memory
        .allocate_local_memory_slot(space, mosaic_core::channel::coordination_buffer_size())
        .unwrap();
    initialize_coordination_buffer(&slot).unwrap();
    slot
}

/// Allocate a slot and fill it with the given little-endian u32 tokens
pub fn u32_source(
    memory: &HostMemoryManager,
    space: &Arc<MemorySpace>,
    values: &[u32],
) -> Arc<LocalMemorySlot> {
    let slot = memory
        .allocate_local_memory_slot(space, values.len() * std::mem::size_of::<u32>())
        .unwrap();
    let bytes: &[u8] = bytemuck::cast_slice(values);
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), slot.pointer(), bytes.len()) };
    slot
}

/// Read the u32 token at `index` of a token buffer slot
pub fn read_u32(slot: &Arc<LocalMemorySlot>, index: usize) -> u32 {
    assert!((index + 1) * std::mem::size_of::<u32>() <= slot.size());
    unsafe { (slot.pointer() as *const u32).add(index).read() }
}
