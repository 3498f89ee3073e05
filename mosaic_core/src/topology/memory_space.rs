//! Memory spaces: sized, byte-addressable domains on a device.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};

use crate::error::{MosaicError, MosaicResult};

/// A contiguous, byte-addressable unit of memory on a device (a host NUMA
/// node, device DRAM, a mapped shared segment).
///
/// The size is fixed at construction time; usage moves with every
/// allocate/register/free/deregister performed by a memory manager against
/// this space. The invariant `usage <= size` is enforced on every increase.
#[derive(Debug)]
pub struct MemorySpace {
    space_type: String,
    size: u64,
    usage: AtomicU64,
}

impl MemorySpace {
    /// Create a memory space with the given human-readable type tag and size
    pub fn new<S: Into<String>>(space_type: S, size: u64) -> Self {
        Self {
            space_type: space_type.into(),
            size,
            usage: AtomicU64::new(0),
        }
    }

    /// Human-readable description of the memory space type
    pub fn space_type(&self) -> &str {
        &self.space_type
    }

    /// Total size of the memory space, in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes currently accounted as in use
    pub fn usage(&self) -> u64 {
        self.usage.load(Ordering::Acquire)
    }

    /// Register an increase in used memory, by allocation or registration.
    ///
    /// Fails with `CapacityExceeded` when `usage + delta > size`; usage is
    /// left untouched in that case.
    pub fn increase_usage(&self, delta: u64) -> MosaicResult<()> {
        let mut current = self.usage.load(Ordering::Relaxed);
        loop {
            let new = current.checked_add(delta).ok_or(MosaicError::CapacityExceeded {
                usage: current,
                delta,
                size: self.size,
            })?;
            if new > self.size {
                return Err(MosaicError::CapacityExceeded {
                    usage: current,
                    delta,
                    size: self.size,
                });
            }
            match self
                .usage
                .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Register a decrease in used memory, by freeing or deregistration.
    ///
    /// Decreasing below zero means the accounting got out of sync, which is
    /// a bug in the calling manager, not a recoverable condition.
    pub fn decrease_usage(&self, delta: u64) {
        let previous = self.usage.fetch_sub(delta, Ordering::AcqRel);
        assert!(
            previous >= delta,
            "memory space usage underflow: {} - {}",
            previous,
            delta
        );
    }

    /// Serialize to the canonical JSON shape (`Type`, `Size`, `Usage`)
    pub fn serialize(&self) -> Value {
        json!({
            "Type": self.space_type,
            "Size": self.size,
            "Usage": self.usage(),
        })
    }

    /// Rebuild a memory space from its serialized form, rejecting malformed
    /// input at the boundary
    pub fn deserialize(input: &Value) -> MosaicResult<Self> {
        let space_type = require_str(input, "Type")?;
        let size = require_u64(input, "Size")?;
        let usage = require_u64(input, "Usage")?;
        let space = Self::new(space_type, size);
        space.usage.store(usage, Ordering::Release);
        Ok(space)
    }
}

impl PartialEq for MemorySpace {
    fn eq(&self, other: &Self) -> bool {
        self.space_type == other.space_type
            && self.size == other.size
            && self.usage() == other.usage()
    }
}

pub(crate) fn require_str<'a>(input: &'a Value, key: &str) -> MosaicResult<&'a str> {
    input
        .get(key)
        .ok_or_else(|| MosaicError::serialization(format!("missing '{}' key", key)))?
        .as_str()
        .ok_or_else(|| MosaicError::serialization(format!("'{}' entry is not a string", key)))
}

pub(crate) fn require_u64(input: &Value, key: &str) -> MosaicResult<u64> {
    input
        .get(key)
        .ok_or_else(|| MosaicError::serialization(format!("missing '{}' key", key)))?
        .as_u64()
        .ok_or_else(|| {
            MosaicError::serialization(format!("'{}' entry is not an unsigned number", key))
        })
}

pub(crate) fn require_bool(input: &Value, key: &str) -> MosaicResult<bool> {
    input
        .get(key)
        .ok_or_else(|| MosaicError::serialization(format!("missing '{}' key", key)))?
        .as_bool()
        .ok_or_else(|| MosaicError::serialization(format!("'{}' entry is not a boolean", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_is_bounded_by_size() {
        let space = MemorySpace::new("RAM", 100);
        space.increase_usage(60).unwrap();
        space.increase_usage(40).unwrap();
        assert_eq!(space.usage(), 100);

        let err = space.increase_usage(1).unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(space.usage(), 100);

        space.decrease_usage(100);
        assert_eq!(space.usage(), 0);
    }

    #[test]
    #[should_panic]
    fn usage_underflow_is_a_bug() {
        let space = MemorySpace::new("RAM", 100);
        space.decrease_usage(1);
    }

    #[test]
    fn round_trip() {
        let space = MemorySpace::new("Device DRAM", 1 << 30);
        space.increase_usage(4096).unwrap();
        let restored = MemorySpace::deserialize(&space.serialize()).unwrap();
        assert_eq!(space, restored);
    }

    #[test]
    fn rejects_malformed_input() {
        let input = json!({ "Type": "RAM", "Size": -5, "Usage": 0 });
        assert!(MemorySpace::deserialize(&input).is_err());

        let input = json!({ "Size": 10, "Usage": 0 });
        assert!(MemorySpace::deserialize(&input).is_err());
    }
}
