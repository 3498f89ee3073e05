//! # Communication manager
//!
//! The seam for one-sided asynchronous data movement between memory slots
//! that may live in different memory spaces, on different peers.
//!
//! The model is tag-scoped: a tag identifies a collective epoch (slots
//! exchanged together) and a fence group (transfers quiesced together).
//! `memcpy` is non-blocking; its effects become observable only after the
//! matching `fence`. No ordering is promised across tags.

use std::sync::Arc;

use crate::error::MosaicResult;
use crate::memory::{GlobalKey, GlobalMemorySlot, LocalMemorySlot, Slot, Tag};

/// A (key, local slot) pair contributed to a collective exchange
pub type GlobalKeySlotPair = (GlobalKey, Arc<LocalMemorySlot>);

/// Backend seam for slot promotion, tagged exchange/fence, one-sided memcpy
/// and distributed locking.
///
/// All state is per-manager: construction initializes it, drop tears it
/// down. Implementations may be cloned handles over shared state so that
/// every peer (thread, process, rank) holds its own.
pub trait CommunicationManager: Send + Sync {
    /// Collectively promote local slots to global visibility under `tag`.
    ///
    /// Every peer participating in `tag` must call this (possibly with an
    /// empty contribution) followed by `fence(tag)`; afterwards any peer can
    /// retrieve any contributed slot by key. Calling exchange again with the
    /// same tag starts a new epoch and invalidates the earlier global slots
    /// for that tag.
    fn exchange_global_memory_slots(
        &self,
        tag: Tag,
        pairs: &[GlobalKeySlotPair],
    ) -> MosaicResult<()>;

    /// Retrieve a slot contributed by any peer in the last fenced exchange
    /// epoch of `tag`
    fn get_global_memory_slot(&self, tag: Tag, key: GlobalKey) -> MosaicResult<Arc<GlobalMemorySlot>>;

    /// Block until all transfers and exchanges under `tag` have quiesced:
    /// local memcpy sources are reusable, remote deliveries into local slots
    /// are counted, and the exchange epoch is visible everywhere.
    ///
    /// This is a group barrier; other tags proceed independently. It is the
    /// only blocking primitive in the core.
    fn fence(&self, tag: Tag) -> MosaicResult<()>;

    /// Zero-cost fence variant for peers that know their expected message
    /// counts: waits until the given slots have received `expected_in` and
    /// sent `expected_out` messages in total, without an all-to-all.
    fn fence_counted(
        &self,
        tag: Tag,
        expected_in: u64,
        expected_out: u64,
        slots: &[Arc<GlobalMemorySlot>],
    ) -> MosaicResult<()>;

    /// One-sided, non-blocking copy of `size` bytes between slots.
    ///
    /// At least one of the two slots must be globally addressable; the other
    /// may be local. On completion (observable after the matching fence) the
    /// destination's received counter and the source's sent counter each
    /// increase by one, and the destination bytes equal the source bytes as
    /// the sender observed them. Concurrent writers to overlapping regions
    /// get no coherence promise.
    fn memcpy(
        &self,
        destination: Slot,
        destination_offset: usize,
        source: Slot,
        source_offset: usize,
        size: usize,
    ) -> MosaicResult<()>;

    /// Ensure issued transfers have left their source buffers, making them
    /// reusable. No-op for backends that deliver synchronously.
    fn flush(&self) -> MosaicResult<()> {
        Ok(())
    }

    /// One-sided alternative to exchange: make a local slot globally
    /// addressable under a locally-assigned key, for peers that receive the
    /// serialized handle out-of-band.
    fn promote_local_memory_slot(
        &self,
        slot: &Arc<LocalMemorySlot>,
        tag: Tag,
    ) -> MosaicResult<Arc<GlobalMemorySlot>>;

    /// Local-only teardown of a promoted slot
    fn destroy_promoted_global_memory_slot(
        &self,
        slot: &Arc<GlobalMemorySlot>,
    ) -> MosaicResult<()>;

    /// Collectively retire a slot from the exchange registry of its tag
    fn destroy_global_memory_slot(&self, slot: &Arc<GlobalMemorySlot>) -> MosaicResult<()>;

    /// Serialize a global slot handle. The form is opaque but stable for the
    /// lifetime of the exchange epoch.
    fn serialize_global_memory_slot(&self, slot: &Arc<GlobalMemorySlot>) -> MosaicResult<Vec<u8>>;

    /// Rebuild a global slot handle from its serialized form, resolved
    /// against `tag`. Malformed or unresolvable input is rejected.
    fn deserialize_global_memory_slot(
        &self,
        bytes: &[u8],
        tag: Tag,
    ) -> MosaicResult<Arc<GlobalMemorySlot>>;

    /// Non-blocking try-acquire of the distributed lock keyed by the slot's
    /// identity. Returns `false` under contention; the caller implements its
    /// own back-off. While held, the holder may read and update the slot's
    /// coordination cells without racing other producers; it must not call
    /// blocking primitives before releasing.
    fn acquire_global_lock(&self, slot: &Arc<GlobalMemorySlot>) -> MosaicResult<bool>;

    /// Release a lock previously acquired on the slot
    fn release_global_lock(&self, slot: &Arc<GlobalMemorySlot>) -> MosaicResult<()>;

    /// Non-blocking progress pump. Required before reading a slot's message
    /// counters for an up-to-date value; may be a no-op for backends that
    /// deliver counter updates synchronously.
    fn query_memory_slot_updates(&self, slot: &Slot) -> MosaicResult<()>;
}
