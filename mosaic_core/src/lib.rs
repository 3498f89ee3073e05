//! # Mosaic Core
//!
//! The core runtime abstraction for heterogeneous, distributed computing.
//!
//! Mosaic exposes a uniform model over CPUs, accelerators and interconnects
//! so that higher-level frontends (task schedulers, channels, object
//! stores) can compose without knowing the underlying technology. This
//! crate provides the fundamental building blocks:
//!
//! - **Topology**: devices, their compute resources and memory spaces,
//!   serializable for exchange between peers
//! - **Memory**: local and global memory slots with usage accounting and
//!   message counters
//! - **Communication**: tagged slot exchange, one-sided memcpy, fences and
//!   distributed locks behind a backend-agnostic seam
//! - **Channels**: fixed- and variable-size SPSC/MPSC queues driven by
//!   lock-free ring bookkeeping over remotely writable cells
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mosaic_core::backends::host::{HostMemoryManager, HostTopologyManager};
//! use mosaic_core::backends::shmem::ShmemCommunicationManager;
//! use mosaic_core::{CommunicationManager, MemoryManager, TopologyManager};
//!
//! let topology = HostTopologyManager::new().query_topology().unwrap();
//! let space = Arc::clone(&topology.device(0).unwrap().memory_spaces()[0]);
//!
//! let memory = HostMemoryManager::new();
//! let comm = ShmemCommunicationManager::new(1).unwrap();
//!
//! let slot = memory.allocate_local_memory_slot(&space, 256).unwrap();
//! comm.exchange_global_memory_slots(0, &[(0, Arc::clone(&slot))]).unwrap();
//! comm.fence(0).unwrap();
//! ```

pub mod backends;
pub mod channel;
pub mod comm;
pub mod error;
pub mod memory;
pub mod topology;

// Re-export commonly used types for easy access
pub use comm::{CommunicationManager, GlobalKeySlotPair};
pub use error::{MosaicError, MosaicResult};
pub use memory::{
    CounterCell, GlobalKey, GlobalMemorySlot, LocalMemorySlot, MemoryManager, Slot, Tag,
};
pub use topology::{
    Cache, ComputeResource, Device, DeviceId, MemorySpace, Topology, TopologyManager,
};

// Re-export the channel building blocks for frontend usage
pub use channel::CircularBuffer;
