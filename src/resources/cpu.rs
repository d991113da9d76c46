//! Cpu resource: scheduling class placement, shares and CFS bandwidth.
//!
//! Batch containers are folded into a shared `/batch` cgroup subtree; all
//! other containers map 1:1 onto the cpu hierarchy. The cgroup's location
//! is the source of truth for which class a container landed in.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::unistd::Pid;

use super::handler::{
    destroy_or_return, AnyController, CgroupHandlerFactory, HandlerCore, HasHandlerCore,
};
use super::{DestroyError, ResourceHandler, ResourceHandlerFactory, ResourceType};
use crate::cgroup::cpu::{CpuController, CpuControllerFactory};
use crate::cgroup::cpuacct::{CpuAcctController, CpuAcctControllerFactory};
use crate::cgroup::{CgroupFactory, TypedController};
use crate::common::{ContainerName, PathBufExt};
use crate::events::{EventCallback, NotificationId};
use crate::spec::{
    ContainerSpec, CpuSpec, EventSpec, InitSpec, SchedulingClass, StatsType, UpdatePolicy,
};
use crate::stats::{set_if_present, ContainerStats};
use crate::status::{Status, StatusCode};

/// Shared cgroup for all batch-class containers.
const BATCH_ROOT: &str = "/batch";

const DEFAULT_SHARES: u64 = 1024;
const DEFAULT_PERIOD_US: u64 = 100000;

pub struct CpuResourceHandlerFactory {
    cpu: CpuControllerFactory,
    cpuacct: CpuAcctControllerFactory,
}

impl CpuResourceHandlerFactory {
    pub fn new(cgroups: &Arc<CgroupFactory>) -> Result<Self, Status> {
        if !cgroups.is_mounted(CpuControllerFactory::hierarchy_type()) {
            return Err(Status::not_found(
                "cpu resource depends on the cpu cgroup hierarchy",
            ));
        }
        if !cgroups.is_mounted(CpuAcctControllerFactory::hierarchy_type()) {
            return Err(Status::not_found(
                "cpu resource depends on the cpuacct cgroup hierarchy",
            ));
        }

        Ok(CpuResourceHandlerFactory {
            cpu: CpuControllerFactory::new(Arc::clone(cgroups)),
            cpuacct: CpuAcctControllerFactory::new(Arc::clone(cgroups)),
        })
    }

    fn hierarchy_path(
        container_name: &ContainerName,
        class: SchedulingClass,
    ) -> Result<PathBuf, Status> {
        match class {
            SchedulingClass::Normal => Ok(container_name.to_path().to_path_buf()),
            SchedulingClass::Batch => {
                Ok(PathBuf::from(BATCH_ROOT).join_safely(container_name.to_path())?)
            }
        }
    }

    fn handler(
        &self,
        container_name: &ContainerName,
        class: SchedulingClass,
        cpu: CpuController,
        cpuacct: CpuAcctController,
    ) -> Box<dyn ResourceHandler> {
        Box::new(CpuResourceHandler {
            core: HandlerCore::new(
                container_name.clone(),
                ResourceType::Cpu,
                vec![AnyController::Cpu(cpu), AnyController::CpuAcct(cpuacct)],
            ),
            scheduling_class: class,
        })
    }
}

impl CgroupHandlerFactory for CpuResourceHandlerFactory {
    fn get_resource_handler(
        &self,
        container_name: &ContainerName,
    ) -> Result<Box<dyn ResourceHandler>, Status> {
        // probe the 1:1 location first, then the batch subtree
        for class in [SchedulingClass::Normal, SchedulingClass::Batch] {
            let path = Self::hierarchy_path(container_name, class)?;
            match self.cpu.get(&path) {
                Ok(cpu) => {
                    let cpuacct = self.cpuacct.get(&path)?;
                    return Ok(self.handler(container_name, class, cpu, cpuacct));
                }
                Err(status) if status.is_not_found() => continue,
                Err(status) => return Err(status),
            }
        }

        Err(Status::not_found(format!(
            "container {container_name} has no cpu cgroup"
        )))
    }

    fn create_resource_handler(
        &self,
        container_name: &ContainerName,
        spec: &ContainerSpec,
    ) -> Result<Box<dyn ResourceHandler>, Status> {
        let class = spec
            .cpu
            .as_ref()
            .and_then(|cpu| cpu.scheduling_class)
            .unwrap_or_default();
        let path = Self::hierarchy_path(container_name, class)?;

        let cpu = self.cpu.create(&path)?;
        let cpuacct = match self.cpuacct.create(&path) {
            Ok(controller) => controller,
            // cpu and cpuacct are commonly comounted; the directory was
            // created by the cpu factory just above
            Err(status) if status.code() == StatusCode::AlreadyExists => self.cpuacct.get(&path)?,
            Err(status) => {
                if let Err(destroy_status) = cpu.base().destroy() {
                    tracing::warn!(
                        "failed to roll back cpu cgroup for {}: {}",
                        container_name,
                        destroy_status
                    );
                }
                return Err(status);
            }
        };

        Ok(self.handler(container_name, class, cpu, cpuacct))
    }
}

impl ResourceHandlerFactory for CpuResourceHandlerFactory {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Cpu
    }

    fn get(&self, container_name: &str) -> Result<Box<dyn ResourceHandler>, Status> {
        self.get_handler(container_name)
    }

    fn create(
        &self,
        container_name: &str,
        spec: &ContainerSpec,
    ) -> Result<Box<dyn ResourceHandler>, Status> {
        self.create_handler(container_name, spec)
    }

    /// Sets up the shared batch subtree on both hierarchies.
    fn init_machine(&self, _spec: &InitSpec) -> Result<(), Status> {
        let batch = Path::new(BATCH_ROOT);

        match self.cpu.create(batch) {
            Ok(_) => {}
            Err(status) if status.code() == StatusCode::AlreadyExists => {}
            Err(status) => return Err(status),
        }
        match self.cpuacct.create(batch) {
            Ok(_) => {}
            Err(status) if status.code() == StatusCode::AlreadyExists => {}
            Err(status) => return Err(status),
        }

        Ok(())
    }
}

#[derive(Debug)]
struct CpuResourceHandler {
    core: HandlerCore,
    scheduling_class: SchedulingClass,
}

impl CpuResourceHandler {
    fn apply(&self, cpu: &CpuSpec, policy: UpdatePolicy) -> Result<(), Status> {
        if let Some(class) = cpu.scheduling_class {
            if class != self.scheduling_class {
                return Err(Status::invalid_argument(format!(
                    "scheduling class of {} cannot change after creation",
                    self.core.container_name()
                )));
            }
        }

        let controller = self.core.cpu()?;
        match policy {
            UpdatePolicy::Replace => {
                controller.set_shares(cpu.shares.unwrap_or(DEFAULT_SHARES))?;
                controller.set_quota(cpu.quota_us.unwrap_or(-1))?;
                controller.set_period(cpu.period_us.unwrap_or(DEFAULT_PERIOD_US))?;
            }
            UpdatePolicy::Diff => {
                if let Some(shares) = cpu.shares {
                    controller.set_shares(shares)?;
                }
                if let Some(quota) = cpu.quota_us {
                    controller.set_quota(quota)?;
                }
                if let Some(period) = cpu.period_us {
                    controller.set_period(period)?;
                }
            }
        }

        Ok(())
    }
}

impl HasHandlerCore for CpuResourceHandler {
    fn core(&self) -> &HandlerCore {
        &self.core
    }
}

impl ResourceHandler for CpuResourceHandler {
    fn container_name(&self) -> &str {
        self.core.container_name().as_str()
    }

    fn resource_type(&self) -> ResourceType {
        self.core.resource_type()
    }

    fn update(&self, spec: &ContainerSpec, policy: UpdatePolicy) -> Result<(), Status> {
        let _guard = self.core.lock_updates();
        tracing::debug!("applying cpu config for {}", self.core.container_name());

        match (&spec.cpu, policy) {
            (Some(cpu), _) => self.apply(cpu, policy),
            (None, UpdatePolicy::Replace) => self.apply(&CpuSpec::default(), policy),
            (None, UpdatePolicy::Diff) => Ok(()),
        }
    }

    fn stats(&self, kind: StatsType, output: &mut ContainerStats) -> Result<(), Status> {
        let cpuacct = self.core.cpuacct()?;
        let stats = output.cpu.get_or_insert_with(Default::default);

        set_if_present(cpuacct.get_usage(), &mut stats.usage)?;

        if matches!(kind, StatsType::Full) {
            if let Some(usage) = stats.usage.as_mut() {
                match cpuacct.get_per_core_usage() {
                    Ok(per_core) => usage.per_core = per_core,
                    Err(status) if status.is_not_found() => {}
                    Err(status) => return Err(status),
                }
            }

            set_if_present(self.core.cpu()?.get_throttling(), &mut stats.throttling)?;
        }

        Ok(())
    }

    fn spec(&self, output: &mut ContainerSpec) -> Result<(), Status> {
        let controller = self.core.cpu()?;
        let cpu = output.cpu.get_or_insert_with(Default::default);

        cpu.scheduling_class = Some(self.scheduling_class);
        set_if_present(controller.get_shares(), &mut cpu.shares)?;
        set_if_present(controller.get_quota(), &mut cpu.quota_us)?;
        set_if_present(controller.get_period(), &mut cpu.period_us)?;

        Ok(())
    }

    fn register_notification(
        &self,
        _event: &EventSpec,
        _callback: EventCallback,
    ) -> Result<NotificationId, Status> {
        Err(Status::not_found("no handled event found"))
    }

    fn enter(&self, tids: &[Pid]) -> Result<(), Status> {
        self.core.enter_all(tids)
    }

    fn destroy(self: Box<Self>) -> Result<(), DestroyError> {
        destroy_or_return(self)
    }
}
