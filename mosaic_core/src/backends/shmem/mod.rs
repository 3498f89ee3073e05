//! Shared-memory communication manager.
//!
//! Serves peers that share one address space (threads of a process, or
//! processes over a mapped region registered as slot storage). Slots are
//! reachable by pointer, so one-sided memcpy completes synchronously and
//! the progress pump is a no-op; what remains of the protocol is the tagged
//! exchange registry, the per-tag fence barrier and the distributed-lock
//! table, all held behind one shared state that every peer's manager handle
//! points at.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::Backoff;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::backends::BackendSlot;
use crate::comm::{CommunicationManager, GlobalKeySlotPair};
use crate::error::{MosaicError, MosaicResult};
use crate::memory::{GlobalKey, GlobalMemorySlot, LocalMemorySlot, Slot, Tag};

const BACKEND_NAME: &str = "shmem";

/// Promoted keys are assigned locally; keep them out of the range
/// applications use for exchanged keys.
const PROMOTED_KEY_BASE: GlobalKey = 1 << 62;

/// Shared-memory half of a global slot: just a process-unique identity,
/// which keys the lock table and the serialized handle
#[derive(Debug)]
pub struct ShmemSlot {
    id: u64,
}

impl BackendSlot for ShmemSlot {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn slot_id(&self) -> u64 {
        self.id
    }
}

/// Serialized form of a shmem global slot handle
#[derive(Debug, Serialize, Deserialize)]
struct SlotDescriptor {
    backend: String,
    tag: Tag,
    key: GlobalKey,
    slot_id: u64,
}

#[derive(Default)]
struct TagState {
    epoch: u64,
    open_exchangers: usize,
    building: HashMap<GlobalKey, Arc<GlobalMemorySlot>>,
    active: HashMap<GlobalKey, Arc<GlobalMemorySlot>>,
}

#[derive(Default)]
struct FenceCell {
    arrived: usize,
    generation: u64,
}

struct State {
    peer_count: usize,
    registry: Mutex<HashMap<Tag, TagState>>,
    promoted: Mutex<HashMap<(Tag, GlobalKey), Arc<GlobalMemorySlot>>>,
    locks: Mutex<HashSet<u64>>,
    fence_cells: Mutex<HashMap<Tag, FenceCell>>,
    fence_cv: Condvar,
    next_slot_id: AtomicU64,
    next_promoted_key: AtomicU64,
}

/// Communication manager for peers sharing one address space.
///
/// Construct one with the number of participating peers and hand a clone to
/// each; the clones share all state. `fence(tag)` releases once every peer
/// has called it for that tag.
#[derive(Clone)]
pub struct ShmemCommunicationManager {
    state: Arc<State>,
}

impl ShmemCommunicationManager {
    pub fn new(peer_count: usize) -> MosaicResult<Self> {
        if peer_count == 0 {
            return Err(MosaicError::logic(
                "attempting to create a communication manager with zero peers",
            ));
        }
        Ok(Self {
            state: Arc::new(State {
                peer_count,
                registry: Mutex::new(HashMap::new()),
                promoted: Mutex::new(HashMap::new()),
                locks: Mutex::new(HashSet::new()),
                fence_cells: Mutex::new(HashMap::new()),
                fence_cv: Condvar::new(),
                next_slot_id: AtomicU64::new(1),
                next_promoted_key: AtomicU64::new(0),
            }),
        })
    }

    pub fn peer_count(&self) -> usize {
        self.state.peer_count
    }

    fn new_slot_id(&self) -> u64 {
        self.state.next_slot_id.fetch_add(1, Ordering::AcqRel)
    }

    /// Resolve a slot to its byte region. Every reachable slot here is
    /// locally backed; a sourceless global slot cannot be addressed.
    fn resolve(slot: &Slot) -> MosaicResult<(*mut u8, usize)> {
        match slot {
            Slot::Local(local) => {
                local.ensure_live()?;
                Ok((local.pointer(), local.size()))
            }
            Slot::Global(global) => match global.source_local_memory_slot() {
                Some(source) => {
                    source.ensure_live()?;
                    Ok((source.pointer(), source.size()))
                }
                None => Err(MosaicError::transport(
                    BACKEND_NAME,
                    "global slot is not locally backed",
                )),
            },
        }
    }

    /// Copy `size` bytes, cell-atomically where possible so that remote
    /// coordination-cell updates are single 8-byte writes from the reader's
    /// viewpoint
    unsafe fn transfer(dst: *mut u8, src: *const u8, size: usize) {
        let cell_aligned = size % 8 == 0 && dst as usize % 8 == 0 && src as usize % 8 == 0;
        if cell_aligned {
            let dst = dst as *mut u64;
            let src = src as *const u64;
            for i in 0..size / 8 {
                let value =
                    AtomicU64::from_ptr(src.add(i) as *mut u64).load(Ordering::Acquire);
                AtomicU64::from_ptr(dst.add(i)).store(value, Ordering::Release);
            }
        } else {
            std::ptr::copy(src, dst, size);
        }
    }

    fn publish_epoch(&self, tag: Tag) {
        let mut registry = self.state.registry.lock();
        if let Some(tag_state) = registry.get_mut(&tag) {
            if tag_state.open_exchangers > 0 {
                tag_state.active = std::mem::take(&mut tag_state.building);
                tag_state.open_exchangers = 0;
                tag_state.epoch += 1;
                log::trace!(
                    "tag {}: published exchange epoch {} ({} slots)",
                    tag,
                    tag_state.epoch,
                    tag_state.active.len()
                );
            }
        }
    }
}

impl CommunicationManager for ShmemCommunicationManager {
    fn exchange_global_memory_slots(
        &self,
        tag: Tag,
        pairs: &[GlobalKeySlotPair],
    ) -> MosaicResult<()> {
        let mut registry = self.state.registry.lock();
        let tag_state = registry.entry(tag).or_default();
        // The first contribution after a publish opens a new epoch
        if tag_state.open_exchangers == 0 {
            tag_state.building.clear();
        }
        tag_state.open_exchangers += 1;
        for (key, slot) in pairs {
            slot.ensure_live()?;
            let global = Arc::new(GlobalMemorySlot::new(
                tag,
                *key,
                Some(Arc::clone(slot)),
                Box::new(ShmemSlot {
                    id: self.new_slot_id(),
                }),
            ));
            tag_state.building.insert(*key, global);
        }
        Ok(())
    }

    fn get_global_memory_slot(
        &self,
        tag: Tag,
        key: GlobalKey,
    ) -> MosaicResult<Arc<GlobalMemorySlot>> {
        let registry = self.state.registry.lock();
        registry
            .get(&tag)
            .and_then(|tag_state| tag_state.active.get(&key))
            .cloned()
            .ok_or_else(|| {
                MosaicError::logic(format!(
                    "no global memory slot under tag {} key {} (was it exchanged and fenced?)",
                    tag, key
                ))
            })
    }

    fn fence(&self, tag: Tag) -> MosaicResult<()> {
        let mut cells = self.state.fence_cells.lock();
        let (arrived, generation) = {
            let cell = cells.entry(tag).or_default();
            cell.arrived += 1;
            (cell.arrived, cell.generation)
        };
        if arrived == self.state.peer_count {
            {
                let cell = cells.get_mut(&tag).expect("fence cell exists");
                cell.arrived = 0;
                cell.generation = cell.generation.wrapping_add(1);
            }
            self.publish_epoch(tag);
            self.state.fence_cv.notify_all();
        } else {
            while cells.get(&tag).map(|cell| cell.generation) == Some(generation) {
                self.state.fence_cv.wait(&mut cells);
            }
        }
        Ok(())
    }

    fn fence_counted(
        &self,
        _tag: Tag,
        expected_in: u64,
        expected_out: u64,
        slots: &[Arc<GlobalMemorySlot>],
    ) -> MosaicResult<()> {
        let backoff = Backoff::new();
        loop {
            for slot in slots {
                self.query_memory_slot_updates(&Slot::global(slot))?;
            }
            let received: u64 = slots.iter().map(|slot| slot.messages_recv()).sum();
            let sent: u64 = slots.iter().map(|slot| slot.messages_sent()).sum();
            if received >= expected_in && sent >= expected_out {
                return Ok(());
            }
            backoff.snooze();
        }
    }

    fn memcpy(
        &self,
        destination: Slot,
        destination_offset: usize,
        source: Slot,
        source_offset: usize,
        size: usize,
    ) -> MosaicResult<()> {
        if !destination.is_global() && !source.is_global() {
            return Err(MosaicError::logic(
                "memcpy requires at least one globally-addressable slot",
            ));
        }

        let (destination_ptr, destination_size) = Self::resolve(&destination)?;
        let (source_ptr, source_size) = Self::resolve(&source)?;

        if destination_offset + size > destination_size {
            return Err(MosaicError::logic(format!(
                "memcpy destination range [{}, {}) exceeds slot size {}",
                destination_offset,
                destination_offset + size,
                destination_size
            )));
        }
        if source_offset + size > source_size {
            return Err(MosaicError::logic(format!(
                "memcpy source range [{}, {}) exceeds slot size {}",
                source_offset,
                source_offset + size,
                source_size
            )));
        }

        unsafe {
            Self::transfer(
                destination_ptr.add(destination_offset),
                source_ptr.add(source_offset),
                size,
            )
        };

        match &destination {
            Slot::Local(slot) => slot.messages_recv_cell().add(1),
            Slot::Global(slot) => slot.increase_messages_recv(),
        }
        match &source {
            Slot::Local(slot) => slot.messages_sent_cell().add(1),
            Slot::Global(slot) => slot.increase_messages_sent(),
        }
        Ok(())
    }

    fn promote_local_memory_slot(
        &self,
        slot: &Arc<LocalMemorySlot>,
        tag: Tag,
    ) -> MosaicResult<Arc<GlobalMemorySlot>> {
        slot.ensure_live()?;
        let key = PROMOTED_KEY_BASE + self.state.next_promoted_key.fetch_add(1, Ordering::AcqRel);
        let global = Arc::new(GlobalMemorySlot::new(
            tag,
            key,
            Some(Arc::clone(slot)),
            Box::new(ShmemSlot {
                id: self.new_slot_id(),
            }),
        ));
        self.state
            .promoted
            .lock()
            .insert((tag, key), Arc::clone(&global));
        Ok(global)
    }

    fn destroy_promoted_global_memory_slot(
        &self,
        slot: &Arc<GlobalMemorySlot>,
    ) -> MosaicResult<()> {
        let removed = self
            .state
            .promoted
            .lock()
            .remove(&(slot.tag(), slot.key()));
        if removed.is_none() {
            return Err(MosaicError::logic(format!(
                "destroying a slot that was not promoted here (tag {}, key {})",
                slot.tag(),
                slot.key()
            )));
        }
        Ok(())
    }

    fn destroy_global_memory_slot(&self, slot: &Arc<GlobalMemorySlot>) -> MosaicResult<()> {
        let mut registry = self.state.registry.lock();
        if let Some(tag_state) = registry.get_mut(&slot.tag()) {
            tag_state.active.remove(&slot.key());
        }
        Ok(())
    }

    fn serialize_global_memory_slot(&self, slot: &Arc<GlobalMemorySlot>) -> MosaicResult<Vec<u8>> {
        let descriptor = SlotDescriptor {
            backend: BACKEND_NAME.to_string(),
            tag: slot.tag(),
            key: slot.key(),
            slot_id: slot.backend().slot_id(),
        };
        Ok(bincode::serialize(&descriptor)?)
    }

    fn deserialize_global_memory_slot(
        &self,
        bytes: &[u8],
        tag: Tag,
    ) -> MosaicResult<Arc<GlobalMemorySlot>> {
        let descriptor: SlotDescriptor = bincode::deserialize(bytes)?;
        if descriptor.backend != BACKEND_NAME {
            return Err(MosaicError::serialization(format!(
                "slot descriptor is for backend '{}', not '{}'",
                descriptor.backend, BACKEND_NAME
            )));
        }

        let found = self
            .state
            .promoted
            .lock()
            .get(&(tag, descriptor.key))
            .cloned()
            .or_else(|| {
                let registry = self.state.registry.lock();
                registry
                    .get(&tag)
                    .and_then(|tag_state| tag_state.active.get(&descriptor.key))
                    .cloned()
            })
            .ok_or_else(|| {
                MosaicError::serialization(format!(
                    "slot descriptor does not resolve under tag {} (key {})",
                    tag, descriptor.key
                ))
            })?;

        // A stale descriptor from a previous epoch names a dead slot
        if found.backend().slot_id() != descriptor.slot_id {
            return Err(MosaicError::serialization(
                "slot descriptor is stale: the exchange epoch has moved on",
            ));
        }
        Ok(found)
    }

    fn acquire_global_lock(&self, slot: &Arc<GlobalMemorySlot>) -> MosaicResult<bool> {
        Ok(self.state.locks.lock().insert(slot.backend().slot_id()))
    }

    fn release_global_lock(&self, slot: &Arc<GlobalMemorySlot>) -> MosaicResult<()> {
        if !self.state.locks.lock().remove(&slot.backend().slot_id()) {
            return Err(MosaicError::logic(
                "releasing a global lock that is not held",
            ));
        }
        Ok(())
    }

    fn query_memory_slot_updates(&self, _slot: &Slot) -> MosaicResult<()> {
        // Transfers complete synchronously; counters are already current
        Ok(())
    }
}
