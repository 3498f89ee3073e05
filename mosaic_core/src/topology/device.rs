//! Devices: collections of compute resources and memory spaces.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{MosaicError, MosaicResult};
use crate::topology::compute::ComputeResource;
use crate::topology::memory_space::{require_str, MemorySpace};

/// Index of a compute resource within its owning device
pub type ComputeResourceId = usize;

/// Index of a memory space within its owning device
pub type MemorySpaceId = usize;

/// A device groups the compute resources and memory spaces of one physical
/// unit (the host, an accelerator card).
///
/// The device owns its resource arenas; compute resources are handed out as
/// stable indices and memory spaces as `Arc` handles, so no reference cycle
/// exists between a device and its parts.
#[derive(Debug)]
pub struct Device {
    device_type: String,
    compute_resources: Vec<ComputeResource>,
    memory_spaces: Vec<Arc<MemorySpace>>,
}

impl Device {
    pub fn new<S: Into<String>>(device_type: S) -> Self {
        Self {
            device_type: device_type.into(),
            compute_resources: Vec::new(),
            memory_spaces: Vec::new(),
        }
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// Add a compute resource, returning its stable id within this device
    pub fn add_compute_resource(&mut self, resource: ComputeResource) -> ComputeResourceId {
        self.compute_resources.push(resource);
        self.compute_resources.len() - 1
    }

    /// Add a memory space, returning its stable id within this device
    pub fn add_memory_space(&mut self, space: Arc<MemorySpace>) -> MemorySpaceId {
        self.memory_spaces.push(space);
        self.memory_spaces.len() - 1
    }

    pub fn compute_resources(&self) -> &[ComputeResource] {
        &self.compute_resources
    }

    pub fn memory_spaces(&self) -> &[Arc<MemorySpace>] {
        &self.memory_spaces
    }

    pub fn compute_resource(&self, id: ComputeResourceId) -> Option<&ComputeResource> {
        self.compute_resources.get(id)
    }

    pub fn memory_space(&self, id: MemorySpaceId) -> Option<&Arc<MemorySpace>> {
        self.memory_spaces.get(id)
    }

    pub fn serialize(&self) -> Value {
        json!({
            "Type": self.device_type,
            "Compute Resources": self
                .compute_resources
                .iter()
                .map(ComputeResource::serialize)
                .collect::<Vec<_>>(),
            "Memory Spaces": self
                .memory_spaces
                .iter()
                .map(|space| space.serialize())
                .collect::<Vec<_>>(),
        })
    }

    pub fn deserialize(input: &Value) -> MosaicResult<Self> {
        let device_type = require_str(input, "Type")?.to_string();

        let resources = input
            .get("Compute Resources")
            .ok_or_else(|| MosaicError::serialization("missing 'Compute Resources' key"))?
            .as_array()
            .ok_or_else(|| MosaicError::serialization("'Compute Resources' is not an array"))?;
        let spaces = input
            .get("Memory Spaces")
            .ok_or_else(|| MosaicError::serialization("missing 'Memory Spaces' key"))?
            .as_array()
            .ok_or_else(|| MosaicError::serialization("'Memory Spaces' is not an array"))?;

        let mut device = Self::new(device_type);
        for entry in resources {
            device.add_compute_resource(ComputeResource::deserialize(entry)?);
        }
        for entry in spaces {
            device.add_memory_space(Arc::new(MemorySpace::deserialize(entry)?));
        }
        Ok(device)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.device_type == other.device_type
            && self.compute_resources == other.compute_resources
            && self.memory_spaces.len() == other.memory_spaces.len()
            && self
                .memory_spaces
                .iter()
                .zip(other.memory_spaces.iter())
                .all(|(a, b)| a.as_ref() == b.as_ref())
    }
}
