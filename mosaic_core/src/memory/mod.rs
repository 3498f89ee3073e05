//! # Memory slots
//!
//! Local slots are handles to contiguous buffers inside one memory space,
//! owned by the peer (and the manager) that created them. Global slots are
//! produced from local ones by a communication manager, either through a
//! tagged collective exchange or a one-sided promotion, and are addressable
//! by remote peers.

pub mod counter;
pub mod global_slot;
pub mod local_slot;
pub mod manager;

pub use counter::CounterCell;
pub use global_slot::{GlobalKey, GlobalMemorySlot, Slot, Tag};
pub use local_slot::LocalMemorySlot;
pub use manager::MemoryManager;
