//! Global memory slots: remotely addressable handles produced by exchange
//! or promotion.

use std::sync::Arc;

use crate::backends::BackendSlot;
use crate::memory::counter::CounterCell;
use crate::memory::local_slot::LocalMemorySlot;

/// Identifies a collective epoch and a fence group
pub type Tag = u64;

/// Identifies one slot within an exchange tag
pub type GlobalKey = u64;

/// A memory slot addressable from any peer that took part in the exchange
/// (or received the serialized handle out-of-band after a promotion).
///
/// When `source` is present the slot is locally backed: one-sided reads and
/// writes go through the backing slot's pointer. A slot without a source is
/// purely remote and only the backend handle knows how to reach it.
#[derive(Debug)]
pub struct GlobalMemorySlot {
    tag: Tag,
    key: GlobalKey,
    source: Option<Arc<LocalMemorySlot>>,
    backend: Box<dyn BackendSlot>,
    // Counter storage for sourceless (purely remote) slots; locally backed
    // slots delegate to their source so every handle sees the same counts.
    messages_recv: CounterCell,
    messages_sent: CounterCell,
}

impl GlobalMemorySlot {
    pub fn new(
        tag: Tag,
        key: GlobalKey,
        source: Option<Arc<LocalMemorySlot>>,
        backend: Box<dyn BackendSlot>,
    ) -> Self {
        Self {
            tag,
            key,
            source,
            backend,
            messages_recv: CounterCell::new(),
            messages_sent: CounterCell::new(),
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn key(&self) -> GlobalKey {
        self.key
    }

    /// The local slot backing this global slot, if any
    pub fn source_local_memory_slot(&self) -> Option<&Arc<LocalMemorySlot>> {
        self.source.as_ref()
    }

    pub fn backend(&self) -> &dyn BackendSlot {
        self.backend.as_ref()
    }

    pub fn messages_recv(&self) -> u64 {
        match &self.source {
            Some(source) => source.messages_recv(),
            None => self.messages_recv.get(),
        }
    }

    pub fn messages_sent(&self) -> u64 {
        match &self.source {
            Some(source) => source.messages_sent(),
            None => self.messages_sent.get(),
        }
    }

    pub(crate) fn increase_messages_recv(&self) {
        match &self.source {
            Some(source) => source.messages_recv_cell().add(1),
            None => self.messages_recv.add(1),
        }
    }

    pub(crate) fn increase_messages_sent(&self) {
        match &self.source {
            Some(source) => source.messages_sent_cell().add(1),
            None => self.messages_sent.add(1),
        }
    }
}

/// The two kinds of slot a one-sided operation can name.
///
/// Collapses the memcpy overload set into one operation: the communication
/// manager dispatches on the variants.
#[derive(Debug, Clone)]
pub enum Slot {
    Local(Arc<LocalMemorySlot>),
    Global(Arc<GlobalMemorySlot>),
}

impl Slot {
    pub fn local(slot: &Arc<LocalMemorySlot>) -> Self {
        Slot::Local(Arc::clone(slot))
    }

    pub fn global(slot: &Arc<GlobalMemorySlot>) -> Self {
        Slot::Global(Arc::clone(slot))
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Slot::Global(_))
    }
}

impl From<&Arc<LocalMemorySlot>> for Slot {
    fn from(slot: &Arc<LocalMemorySlot>) -> Self {
        Slot::local(slot)
    }
}

impl From<&Arc<GlobalMemorySlot>> for Slot {
    fn from(slot: &Arc<GlobalMemorySlot>) -> Self {
        Slot::global(slot)
    }
}
