//! Resource-handler surface: one factory and one handler type per
//! resource, all driven through the same operations.
//!
//! Factories are process-wide singletons constructed at initialisation;
//! handlers are per-(container, resource) and live from `get`/`create`
//! until `destroy` consumes them.

use std::fmt::Display;
use std::sync::Arc;

use nix::unistd::Pid;

use crate::cgroup::CgroupFactory;
use crate::events::{EventCallback, NotificationId};
use crate::spec::{ContainerSpec, EventSpec, InitSpec, StatsType, UpdatePolicy};
use crate::stats::ContainerStats;
use crate::status::Status;

pub mod blkio;
pub mod cpu;
pub mod cpuset;
pub mod device;
pub mod handler;
pub mod memory;
pub mod monitoring;

pub use blkio::BlkioResourceHandlerFactory;
pub use cpu::CpuResourceHandlerFactory;
pub use cpuset::CpusetResourceHandlerFactory;
pub use device::DeviceResourceHandlerFactory;
pub use memory::MemoryResourceHandlerFactory;
pub use monitoring::MonitoringResourceHandlerFactory;

/// The resource kinds this library brokers. Each has exactly one factory
/// and one handler implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Cpu,
    Memory,
    Cpuset,
    Blkio,
    Device,
    Monitoring,
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match self {
            ResourceType::Cpu => "cpu",
            ResourceType::Memory => "memory",
            ResourceType::Cpuset => "cpuset",
            ResourceType::Blkio => "blkio",
            ResourceType::Device => "device",
            ResourceType::Monitoring => "monitoring",
        };

        write!(f, "{print}")
    }
}

/// A failed destroy. The handler stays live and the operation may be
/// retried.
pub struct DestroyError {
    pub handler: Box<dyn ResourceHandler>,
    pub status: Status,
}

impl std::fmt::Debug for DestroyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestroyError")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Display for DestroyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.status, f)
    }
}

impl std::error::Error for DestroyError {}

/// Per-container, per-resource handle over the controllers that back the
/// container. `stats` and `spec` may be called concurrently; mutating
/// operations are serialised per instance.
pub trait ResourceHandler: Send + Sync + std::fmt::Debug {
    fn container_name(&self) -> &str;

    fn resource_type(&self) -> ResourceType;

    /// Pushes the initial configuration of a newly created container.
    fn create(&self, spec: &ContainerSpec) -> Result<(), Status> {
        self.update(spec, UpdatePolicy::Replace)
    }

    /// Applies `spec` field by field, best effort: a mid-sequence failure
    /// leaves the already-written fields in effect.
    fn update(&self, spec: &ContainerSpec, policy: UpdatePolicy) -> Result<(), Status>;

    /// Collects statistics into `output`. Counters the kernel does not
    /// export are silently left unset.
    fn stats(&self, kind: StatsType, output: &mut ContainerStats) -> Result<(), Status>;

    /// Reads the effective configuration back from the controllers, not
    /// from the last written spec.
    fn spec(&self, output: &mut ContainerSpec) -> Result<(), Status>;

    /// Subscribes to a condition. The callback is consumed; when no event
    /// of this handler matches the spec it is dropped and `NotFound` is
    /// returned.
    fn register_notification(
        &self,
        event: &EventSpec,
        callback: EventCallback,
    ) -> Result<NotificationId, Status>;

    /// Moves the given threads into every owned controller, aborting on
    /// the first failure without reverting earlier moves.
    fn enter(&self, tids: &[Pid]) -> Result<(), Status>;

    /// Destroys every owned controller and consumes the handler. On
    /// failure the handler is returned, still live.
    fn destroy(self: Box<Self>) -> Result<(), DestroyError>;
}

/// Entry point for one resource type.
pub trait ResourceHandlerFactory: Send + Sync {
    fn resource_type(&self) -> ResourceType;

    /// Attaches to an existing container. `NotFound` when the backing
    /// cgroup does not exist.
    fn get(&self, container_name: &str) -> Result<Box<dyn ResourceHandler>, Status>;

    /// Creates the backing cgroups and applies the initial spec.
    /// `AlreadyExists` when the container already has this resource.
    fn create(
        &self,
        container_name: &str,
        spec: &ContainerSpec,
    ) -> Result<Box<dyn ResourceHandler>, Status>;

    /// One-shot machine-wide setup.
    fn init_machine(&self, _spec: &InitSpec) -> Result<(), Status> {
        Ok(())
    }
}

/// Constructs the factory for every resource supported on this machine,
/// skipping resources whose hierarchy is not mounted.
pub fn default_factories(cgroups: &Arc<CgroupFactory>) -> Vec<Box<dyn ResourceHandlerFactory>> {
    let mut factories: Vec<Box<dyn ResourceHandlerFactory>> = Vec::new();

    macro_rules! register {
        ($factory: ty, $resource: expr) => {
            match <$factory>::new(cgroups) {
                Ok(factory) => factories.push(Box::new(factory)),
                Err(err) => {
                    tracing::warn!("{} resource is not available: {}", $resource, err)
                }
            }
        };
    }

    register!(CpuResourceHandlerFactory, ResourceType::Cpu);
    register!(MemoryResourceHandlerFactory, ResourceType::Memory);
    register!(CpusetResourceHandlerFactory, ResourceType::Cpuset);
    register!(BlkioResourceHandlerFactory, ResourceType::Blkio);
    register!(DeviceResourceHandlerFactory, ResourceType::Device);
    register!(MonitoringResourceHandlerFactory, ResourceType::Monitoring);

    factories
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::CgroupHierarchy;
    use crate::test::test_cgroup_factory;

    #[test]
    fn test_default_factories_skip_unmounted_resources() {
        let tmp = tempfile::tempdir().unwrap();
        let memory = tmp.path().join("memory");
        let perf = tmp.path().join("perf_event");
        std::fs::create_dir_all(&memory).unwrap();
        std::fs::create_dir_all(&perf).unwrap();

        let cgroups = test_cgroup_factory(&[
            (CgroupHierarchy::Memory, &memory),
            (CgroupHierarchy::PerfEvent, &perf),
        ]);

        let factories = default_factories(&cgroups);
        let types: Vec<ResourceType> = factories.iter().map(|f| f.resource_type()).collect();
        assert_eq!(types, vec![ResourceType::Memory, ResourceType::Monitoring]);
    }

    #[test]
    fn test_default_factories_cover_all_resources_when_mounted() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mounts = Vec::new();
        for hierarchy in [
            CgroupHierarchy::Cpu,
            CgroupHierarchy::CpuAcct,
            CgroupHierarchy::CpuSet,
            CgroupHierarchy::Memory,
            CgroupHierarchy::Blkio,
            CgroupHierarchy::Devices,
            CgroupHierarchy::PerfEvent,
        ] {
            let path = tmp.path().join(hierarchy.as_ref());
            std::fs::create_dir_all(&path).unwrap();
            mounts.push((hierarchy, path));
        }

        let mounts: Vec<(CgroupHierarchy, &std::path::Path)> = mounts
            .iter()
            .map(|(hierarchy, path)| (*hierarchy, path.as_path()))
            .collect();
        let cgroups = test_cgroup_factory(&mounts);

        let factories = default_factories(&cgroups);
        assert_eq!(factories.len(), 6);
    }
}
