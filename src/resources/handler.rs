//! Shared plumbing for cgroup-backed resource handlers.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use nix::unistd::Pid;

use super::{DestroyError, ResourceHandler, ResourceType};
use crate::cgroup::blkio::BlkioController;
use crate::cgroup::cpu::CpuController;
use crate::cgroup::cpuacct::CpuAcctController;
use crate::cgroup::cpuset::CpusetController;
use crate::cgroup::devices::DeviceController;
use crate::cgroup::memory::MemoryController;
use crate::cgroup::perf_event::PerfController;
use crate::cgroup::{CgroupController, CgroupHierarchy, TypedController};
use crate::common::ContainerName;
use crate::spec::ContainerSpec;
use crate::status::Status;

/// A typed controller keyed by its hierarchy in a handler's controller
/// map. Typed access goes through the enum's arms.
#[derive(Debug)]
pub(crate) enum AnyController {
    Cpu(CpuController),
    CpuAcct(CpuAcctController),
    CpuSet(CpusetController),
    Memory(MemoryController),
    Blkio(BlkioController),
    Devices(DeviceController),
    PerfEvent(PerfController),
}

impl AnyController {
    pub(crate) fn base(&self) -> &CgroupController {
        match self {
            AnyController::Cpu(c) => c.base(),
            AnyController::CpuAcct(c) => c.base(),
            AnyController::CpuSet(c) => c.base(),
            AnyController::Memory(c) => c.base(),
            AnyController::Blkio(c) => c.base(),
            AnyController::Devices(c) => c.base(),
            AnyController::PerfEvent(c) => c.base(),
        }
    }

    pub(crate) fn hierarchy(&self) -> CgroupHierarchy {
        self.base().hierarchy()
    }
}

/// State common to every cgroup-backed handler: the controllers keyed by
/// hierarchy, the owning container's name and the per-instance lock that
/// serialises mutating operations.
#[derive(Debug)]
pub(crate) struct HandlerCore {
    container_name: ContainerName,
    resource_type: ResourceType,
    controllers: HashMap<CgroupHierarchy, AnyController>,
    update_lock: Mutex<()>,
}

macro_rules! typed_controller {
    ($fn_name: ident, $variant: ident, $controller: ty) => {
        pub(crate) fn $fn_name(&self) -> Result<&$controller, Status> {
            match self.controller(CgroupHierarchy::$variant)? {
                AnyController::$variant(controller) => Ok(controller),
                _ => Err(Status::internal(format!(
                    "{} handler for {} holds a mistyped {} controller",
                    self.resource_type,
                    self.container_name,
                    CgroupHierarchy::$variant
                ))),
            }
        }
    };
}

impl HandlerCore {
    pub(crate) fn new(
        container_name: ContainerName,
        resource_type: ResourceType,
        controllers: Vec<AnyController>,
    ) -> Self {
        let controllers = controllers
            .into_iter()
            .map(|controller| (controller.hierarchy(), controller))
            .collect();

        HandlerCore {
            container_name,
            resource_type,
            controllers,
            update_lock: Mutex::new(()),
        }
    }

    pub(crate) fn container_name(&self) -> &ContainerName {
        &self.container_name
    }

    pub(crate) fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// Serialises `update`/`enter` against each other on this handler.
    pub(crate) fn lock_updates(&self) -> MutexGuard<'_, ()> {
        self.update_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn controller(&self, hierarchy: CgroupHierarchy) -> Result<&AnyController, Status> {
        self.controllers.get(&hierarchy).ok_or_else(|| {
            Status::internal(format!(
                "{} handler for {} owns no {hierarchy} controller",
                self.resource_type, self.container_name
            ))
        })
    }

    typed_controller!(cpu, Cpu, CpuController);
    typed_controller!(cpuacct, CpuAcct, CpuAcctController);
    typed_controller!(cpuset, CpuSet, CpusetController);
    typed_controller!(memory, Memory, MemoryController);
    typed_controller!(blkio, Blkio, BlkioController);
    typed_controller!(devices, Devices, DeviceController);

    /// Moves each thread into every controller, in arbitrary controller
    /// order, aborting on the first failure.
    pub(crate) fn enter_all(&self, tids: &[Pid]) -> Result<(), Status> {
        let _guard = self.lock_updates();
        for controller in self.controllers.values() {
            for tid in tids {
                controller.base().enter(*tid)?;
            }
        }

        Ok(())
    }

    /// Destroys every controller, in arbitrary order, aborting on the
    /// first failure. Already-destroyed controllers are skipped, so a
    /// retry picks up where the failed attempt stopped.
    pub(crate) fn destroy_controllers(&self) -> Result<(), Status> {
        for controller in self.controllers.values() {
            controller.base().destroy()?;
        }

        Ok(())
    }
}

/// The two primitives a cgroup-backed factory implements, plus the shared
/// `get`/`create` drivers built on them. Name translation lives in the
/// primitives: they decide which cgroup directory backs which container.
pub(crate) trait CgroupHandlerFactory {
    /// Looks up the controllers of an existing container and assembles its
    /// handler. Does not create directories.
    fn get_resource_handler(
        &self,
        container_name: &ContainerName,
    ) -> Result<Box<dyn ResourceHandler>, Status>;

    /// Creates the container's cgroup directories and assembles its
    /// handler. Does not apply the spec.
    fn create_resource_handler(
        &self,
        container_name: &ContainerName,
        spec: &ContainerSpec,
    ) -> Result<Box<dyn ResourceHandler>, Status>;

    fn get_handler(&self, container_name: &str) -> Result<Box<dyn ResourceHandler>, Status> {
        let name = ContainerName::parse(container_name)?;
        self.get_resource_handler(&name)
    }

    /// Creates the directories, then pushes the initial spec through the
    /// new handler. If the spec cannot be applied the directories are
    /// destroyed again; nothing is left behind in the kernel.
    fn create_handler(
        &self,
        container_name: &str,
        spec: &ContainerSpec,
    ) -> Result<Box<dyn ResourceHandler>, Status> {
        let name = ContainerName::parse(container_name)?;
        let handler = self.create_resource_handler(&name, spec)?;

        if let Err(err) = handler.create(spec) {
            if let Err(destroy_err) = handler.destroy() {
                tracing::warn!(
                    "failed to roll back partially created handler for {}: {}",
                    name,
                    destroy_err.status
                );
            }
            return Err(err);
        }

        Ok(handler)
    }
}

/// Consumes the handler on success; hands it back, still live, on failure.
pub(crate) fn destroy_or_return<H: ResourceHandler + HasHandlerCore + 'static>(
    handler: Box<H>,
) -> Result<(), DestroyError> {
    match handler.core().destroy_controllers() {
        Ok(()) => Ok(()),
        Err(status) => Err(DestroyError { handler, status }),
    }
}

/// Internal access to the shared core, for the default operations above.
pub(crate) trait HasHandlerCore {
    fn core(&self) -> &HandlerCore;
}
