//! # Backend adapters
//!
//! Concrete implementations of the topology, memory and communication
//! seams. The `host` backend covers local allocation, host topology and
//! file-backed shared mappings; the `shmem` backend implements the
//! communication manager for peers sharing one address space.
//!
//! Other interconnect technologies plug in through the same traits
//! (`TopologyManager`, `MemoryManager`, `CommunicationManager`,
//! `BackendSlot`); no transport is baked into the core.

pub mod host;
pub mod shmem;

/// Per-backend half of a global memory slot.
///
/// Carries whatever the backend needs to address the slot remotely; the
/// slot id keys the distributed lock and the serialized handle.
pub trait BackendSlot: Send + Sync + std::fmt::Debug {
    /// Name of the backend that produced the slot
    fn backend_name(&self) -> &'static str;

    /// Backend-unique identity of the slot
    fn slot_id(&self) -> u64;
}
