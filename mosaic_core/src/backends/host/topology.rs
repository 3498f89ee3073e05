//! Host topology reflection.

use std::sync::Arc;

use crate::error::MosaicResult;
use crate::topology::{ComputeResource, Device, MemorySpace, Topology, TopologyManager};

/// Reflects the host as a single device: one processing-unit compute
/// resource per logical CPU and one RAM memory space sized from the
/// system's physical memory.
///
/// Cache hierarchies are not probed here; callers that know them can attach
/// `Cache` entries to the compute resources they build themselves.
#[derive(Debug, Default)]
pub struct HostTopologyManager;

impl HostTopologyManager {
    pub fn new() -> Self {
        Self
    }
}

/// Total physical memory in bytes, with a conservative fallback when the
/// platform does not expose it
fn total_physical_memory() -> u64 {
    #[cfg(unix)]
    {
        let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) };
        if pages > 0 && page_size > 0 {
            return pages as u64 * page_size as u64;
        }
    }
    // 1 GiB floor keeps allocation accounting usable when probing fails
    1 << 30
}

impl TopologyManager for HostTopologyManager {
    fn query_topology(&self) -> MosaicResult<Topology> {
        let mut device = Device::new("Host");
        for _ in 0..num_cpus::get() {
            device.add_compute_resource(ComputeResource::new("Processing Unit"));
        }
        device.add_memory_space(Arc::new(MemorySpace::new("RAM", total_physical_memory())));
        log::debug!(
            "host topology: {} processing units, {} bytes of RAM",
            device.compute_resources().len(),
            device.memory_spaces()[0].size()
        );
        Ok(Topology::from_devices(vec![device]))
    }
}
