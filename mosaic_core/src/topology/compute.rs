//! Compute resources and their cache descriptions.

use serde_json::{json, Value};

use crate::error::{MosaicError, MosaicResult};
use crate::topology::memory_space::{require_bool, require_str, require_u64};

/// Cache level, L1 through L5
pub type CacheLevel = u8;

/// Description of one level of a processing unit's cache hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cache {
    level: CacheLevel,
    cache_type: String,
    size_bytes: u64,
    line_size_bytes: u64,
    shared: bool,
}

impl Cache {
    /// Create a cache entry. `level` must be in 1..=5; `cache_type` is one of
    /// `instruction`, `data` or `unified`.
    pub fn new<S: Into<String>>(
        level: CacheLevel,
        cache_type: S,
        size_bytes: u64,
        line_size_bytes: u64,
        shared: bool,
    ) -> MosaicResult<Self> {
        if !(1..=5).contains(&level) {
            return Err(MosaicError::logic(format!(
                "cache level {} outside the supported range 1..=5",
                level
            )));
        }
        Ok(Self {
            level,
            cache_type: cache_type.into(),
            size_bytes,
            line_size_bytes,
            shared,
        })
    }

    pub fn level(&self) -> CacheLevel {
        self.level
    }

    pub fn cache_type(&self) -> &str {
        &self.cache_type
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn line_size_bytes(&self) -> u64 {
        self.line_size_bytes
    }

    /// Whether the cache is shared between processing units
    pub fn shared(&self) -> bool {
        self.shared
    }

    pub fn serialize(&self) -> Value {
        json!({
            "Level": self.level,
            "Type": self.cache_type,
            "Size (Bytes)": self.size_bytes,
            "Line Size (Bytes)": self.line_size_bytes,
            "Shared": self.shared,
        })
    }

    pub fn deserialize(input: &Value) -> MosaicResult<Self> {
        let level = require_u64(input, "Level")?;
        if !(1..=5).contains(&level) {
            return Err(MosaicError::serialization(format!(
                "cache 'Level' {} outside the supported range 1..=5",
                level
            )));
        }
        Ok(Self {
            level: level as CacheLevel,
            cache_type: require_str(input, "Type")?.to_string(),
            size_bytes: require_u64(input, "Size (Bytes)")?,
            line_size_bytes: require_u64(input, "Line Size (Bytes)")?,
            shared: require_bool(input, "Shared")?,
        })
    }
}

/// A single compute resource of a device (a CPU core, an accelerator queue).
///
/// The cache list may be empty; some device types do not expose one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeResource {
    resource_type: String,
    caches: Vec<Cache>,
}

impl ComputeResource {
    pub fn new<S: Into<String>>(resource_type: S) -> Self {
        Self {
            resource_type: resource_type.into(),
            caches: Vec::new(),
        }
    }

    pub fn with_caches<S: Into<String>>(resource_type: S, caches: Vec<Cache>) -> Self {
        Self {
            resource_type: resource_type.into(),
            caches,
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn caches(&self) -> &[Cache] {
        &self.caches
    }

    pub fn serialize(&self) -> Value {
        json!({
            "Type": self.resource_type,
            "Caches": self.caches.iter().map(Cache::serialize).collect::<Vec<_>>(),
        })
    }

    pub fn deserialize(input: &Value) -> MosaicResult<Self> {
        let resource_type = require_str(input, "Type")?.to_string();
        let mut caches = Vec::new();
        // Caches are optional; absent means none were enumerated
        if let Some(entries) = input.get("Caches") {
            let entries = entries.as_array().ok_or_else(|| {
                MosaicError::serialization("'Caches' entry is not an array")
            })?;
            for entry in entries {
                caches.push(Cache::deserialize(entry)?);
            }
        }
        Ok(Self {
            resource_type,
            caches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_round_trip() {
        let cache = Cache::new(1, "data", 32 * 1024, 64, false).unwrap();
        let restored = Cache::deserialize(&cache.serialize()).unwrap();
        assert_eq!(cache, restored);
    }

    #[test]
    fn cache_level_is_validated() {
        assert!(Cache::new(0, "data", 1, 64, false).is_err());
        assert!(Cache::new(6, "unified", 1, 64, true).is_err());
    }

    #[test]
    fn compute_resource_round_trip() {
        let resource = ComputeResource::with_caches(
            "Processing Unit",
            vec![
                Cache::new(1, "instruction", 32 * 1024, 64, false).unwrap(),
                Cache::new(2, "unified", 512 * 1024, 64, false).unwrap(),
                Cache::new(3, "unified", 16 << 20, 64, true).unwrap(),
            ],
        );
        let restored = ComputeResource::deserialize(&resource.serialize()).unwrap();
        assert_eq!(resource, restored);
    }

    #[test]
    fn empty_cache_list_is_valid() {
        let resource = ComputeResource::new("Accelerator Queue");
        let restored = ComputeResource::deserialize(&resource.serialize()).unwrap();
        assert!(restored.caches().is_empty());
    }
}
