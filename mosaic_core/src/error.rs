//! Unified error handling for Mosaic
//!
//! This module provides a centralized error type for the entire runtime,
//! ensuring consistent error handling across all components.
//!
//! Capacity conditions (`WouldOverflow`, `WouldUnderflow`, `OutOfMemory`)
//! and lock contention are part of normal control flow and are returned to
//! the caller. Transport errors are fatal for the affected tag. Violations
//! of internal invariants are bugs and abort via assertion instead of
//! surfacing here.

use thiserror::Error;

/// Main error type for Mosaic operations
#[derive(Debug, Error)]
pub enum MosaicError {
    /// API misuse detected at a public boundary (undersized buffers,
    /// out-of-range arguments, operations on released slots)
    #[error("Logic error: {0}")]
    Logic(String),

    /// Pushing onto a channel would exceed its capacity
    #[error("Channel would overflow: pushing {requested} token(s) with depth {depth} exceeds capacity {capacity}")]
    WouldOverflow {
        requested: u64,
        depth: u64,
        capacity: u64,
    },

    /// Popping from a channel with fewer tokens than requested
    #[error("Channel would underflow: popping {requested} token(s) with only {depth} in the channel")]
    WouldUnderflow { requested: u64, depth: u64 },

    /// Peeking past the current channel depth
    #[error("Peek position {position} is beyond the current channel depth ({depth})")]
    PeekOutOfRange { position: u64, depth: u64 },

    /// A memory space cannot satisfy an allocation or registration
    #[error("Out of memory in space '{space}': requested {requested} bytes, {available} available")]
    OutOfMemory {
        space: String,
        requested: u64,
        available: u64,
    },

    /// Raising a memory space's usage beyond its total size
    #[error("Memory space capacity exceeded: usage {usage} + {delta} > size {size}")]
    CapacityExceeded { usage: u64, delta: u64, size: u64 },

    /// Backend failure during memcpy, fence or exchange; fatal for the tag
    #[error("Transport error in backend '{backend}': {message}")]
    Transport { backend: String, message: String },

    /// A try-lock on a global memory slot did not succeed
    #[error("Lock contention: {0}")]
    LockContention(String),

    /// Malformed topology or global-slot descriptor
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results using MosaicError
pub type MosaicResult<T> = Result<T, MosaicError>;

impl From<serde_json::Error> for MosaicError {
    fn from(err: serde_json::Error) -> Self {
        MosaicError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for MosaicError {
    fn from(err: bincode::Error) -> Self {
        MosaicError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for MosaicError {
    fn from(err: anyhow::Error) -> Self {
        MosaicError::Logic(err.to_string())
    }
}

// Helper methods
impl MosaicError {
    /// Create a logic error with a custom message
    pub fn logic<S: Into<String>>(msg: S) -> Self {
        MosaicError::Logic(msg.into())
    }

    /// Create a transport error with backend name and message
    pub fn transport<S: Into<String>, T: Into<String>>(backend: S, message: T) -> Self {
        MosaicError::Transport {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        MosaicError::Serialization(msg.into())
    }

    /// Check if this is one of the capacity family of errors
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            MosaicError::WouldOverflow { .. }
                | MosaicError::WouldUnderflow { .. }
                | MosaicError::OutOfMemory { .. }
                | MosaicError::CapacityExceeded { .. }
        )
    }

    /// Check if this is a lock contention error
    pub fn is_contention(&self) -> bool {
        matches!(self, MosaicError::LockContention(_))
    }

    /// Check if this is a transport error
    pub fn is_transport(&self) -> bool {
        matches!(self, MosaicError::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_predicates() {
        let err = MosaicError::WouldOverflow {
            requested: 2,
            depth: 3,
            capacity: 4,
        };
        assert!(err.is_capacity());
        assert!(!err.is_transport());

        let err = MosaicError::transport("shmem", "ring closed");
        assert!(err.is_transport());
        assert!(!err.is_capacity());
    }
}
