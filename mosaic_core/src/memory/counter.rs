//! Message counters with swappable backing storage.

use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

/// An atomic counter cell whose storage is inline by default but can be
/// redirected to an externally-mapped address.
///
/// Memory slots carry two of these (messages received / sent). A backend
/// that shares counter storage with remote peers (a mapped segment an RDMA
/// NIC writes into) redirects the cell to that address; the slot handle does
/// not change.
#[derive(Debug)]
pub struct CounterCell {
    inline: AtomicU64,
    external: AtomicPtr<u64>,
}

impl Default for CounterCell {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterCell {
    pub fn new() -> Self {
        Self {
            inline: AtomicU64::new(0),
            external: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    fn storage(&self) -> &AtomicU64 {
        let external = self.external.load(Ordering::Acquire);
        if external.is_null() {
            &self.inline
        } else {
            // Redirection targets are 8-byte aligned cells that outlive the
            // slot; see `redirect`.
            unsafe { AtomicU64::from_ptr(external) }
        }
    }

    pub fn get(&self) -> u64 {
        self.storage().load(Ordering::Acquire)
    }

    pub fn add(&self, n: u64) {
        self.storage().fetch_add(n, Ordering::AcqRel);
    }

    pub fn set(&self, value: u64) {
        self.storage().store(value, Ordering::Release);
    }

    /// Redirect the counter to external storage, carrying the current value
    /// over.
    ///
    /// # Safety
    ///
    /// `target` must be 8-byte aligned, writable, and remain valid for the
    /// rest of the cell's lifetime. Concurrent counter updates during the
    /// swap are the caller's responsibility to exclude.
    pub unsafe fn redirect(&self, target: *mut u64) {
        let current = self.get();
        AtomicU64::from_ptr(target).store(current, Ordering::Release);
        self.external.store(target, Ordering::Release);
    }
}
