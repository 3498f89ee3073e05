//! # Topology model
//!
//! Reflects the devices visible to a peer: each device groups compute
//! resources and memory spaces. Frontends query the topology once, select
//! the memory spaces they care about and pin their slots there.
//!
//! Topologies serialize to a JSON tree with a fixed key vocabulary
//! (`Devices`, `Type`, `Compute Resources`, `Memory Spaces`, ...) so that
//! peers running different backends can exchange and merge machine models.

pub mod compute;
pub mod device;
pub mod memory_space;

use serde_json::{json, Value};

use crate::error::{MosaicError, MosaicResult};

pub use compute::{Cache, CacheLevel, ComputeResource};
pub use device::{ComputeResourceId, Device, MemorySpaceId};
pub use memory_space::MemorySpace;

/// Index of a device within a topology
pub type DeviceId = usize;

/// The set of devices visible to a peer
#[derive(Debug, Default, PartialEq)]
pub struct Topology {
    devices: Vec<Device>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_devices(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    pub fn add_device(&mut self, device: Device) -> DeviceId {
        self.devices.push(device);
        self.devices.len() - 1
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    /// Serialize the full device tree to its canonical JSON shape
    pub fn serialize(&self) -> Value {
        json!({
            "Devices": self.devices.iter().map(Device::serialize).collect::<Vec<_>>(),
        })
    }

    /// Rebuild a topology from its serialized form.
    ///
    /// Malformed input is rejected with a `Serialization` error; nothing is
    /// partially applied.
    pub fn deserialize(input: &Value) -> MosaicResult<Self> {
        let devices = input
            .get("Devices")
            .ok_or_else(|| MosaicError::serialization("missing 'Devices' key"))?
            .as_array()
            .ok_or_else(|| MosaicError::serialization("'Devices' is not an array"))?;

        let mut topology = Self::new();
        for entry in devices {
            topology.add_device(Device::deserialize(entry)?);
        }
        Ok(topology)
    }
}

/// Backend seam for topology discovery.
///
/// Implementations enumerate whatever their technology exposes; an empty
/// compute-resource list is a valid result for device types that do not
/// surface one.
pub trait TopologyManager: Send + Sync {
    fn query_topology(&self) -> MosaicResult<Topology>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample() -> Topology {
        let mut host = Device::new("Host");
        host.add_compute_resource(ComputeResource::with_caches(
            "Processing Unit",
            vec![Cache::new(1, "data", 32 * 1024, 64, false).unwrap()],
        ));
        host.add_memory_space(Arc::new(MemorySpace::new("RAM", 16 << 30)));

        let mut accel = Device::new("Accelerator");
        accel.add_memory_space(Arc::new(MemorySpace::new("Device DRAM", 8 << 30)));

        Topology::from_devices(vec![host, accel])
    }

    #[test]
    fn round_trip_is_structural_identity() {
        let topology = sample();
        let restored = Topology::deserialize(&topology.serialize()).unwrap();
        assert_eq!(topology, restored);
    }

    #[test]
    fn device_without_compute_resources_is_valid() {
        let topology = sample();
        let restored = Topology::deserialize(&topology.serialize()).unwrap();
        assert!(restored.device(1).unwrap().compute_resources().is_empty());
    }

    #[test]
    fn rejects_malformed_trees() {
        assert!(Topology::deserialize(&json!({})).is_err());
        assert!(Topology::deserialize(&json!({ "Devices": 3 })).is_err());
        assert!(Topology::deserialize(&json!({ "Devices": [{ "Type": "Host" }] })).is_err());
    }
}
