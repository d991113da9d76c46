//! Memory resource: limits, reservations, swap and OOM control.

use std::sync::Arc;

use nix::unistd::Pid;

use super::handler::{
    destroy_or_return, AnyController, CgroupHandlerFactory, HandlerCore, HasHandlerCore,
};
use super::{DestroyError, ResourceHandler, ResourceHandlerFactory, ResourceType};
use crate::cgroup::memory::{MemoryController, MemoryControllerFactory};
use crate::cgroup::CgroupFactory;
use crate::common::ContainerName;
use crate::events::{EventCallback, NotificationId};
use crate::spec::{ContainerSpec, EventSpec, MemorySpec, StatsType, UpdatePolicy};
use crate::stats::{set_if_present, ContainerStats};
use crate::status::Status;

const DEFAULT_SWAPPINESS: u64 = 60;

pub struct MemoryResourceHandlerFactory {
    memory: MemoryControllerFactory,
}

impl MemoryResourceHandlerFactory {
    pub fn new(cgroups: &Arc<CgroupFactory>) -> Result<Self, Status> {
        if !cgroups.is_mounted(MemoryControllerFactory::hierarchy_type()) {
            return Err(Status::not_found(
                "memory resource depends on the memory cgroup hierarchy",
            ));
        }

        Ok(MemoryResourceHandlerFactory {
            memory: MemoryControllerFactory::new(Arc::clone(cgroups)),
        })
    }

    fn handler(
        &self,
        container_name: &ContainerName,
        controller: MemoryController,
    ) -> Box<dyn ResourceHandler> {
        Box::new(MemoryResourceHandler {
            core: HandlerCore::new(
                container_name.clone(),
                ResourceType::Memory,
                vec![AnyController::Memory(controller)],
            ),
        })
    }
}

impl CgroupHandlerFactory for MemoryResourceHandlerFactory {
    fn get_resource_handler(
        &self,
        container_name: &ContainerName,
    ) -> Result<Box<dyn ResourceHandler>, Status> {
        let controller = self.memory.get(container_name.to_path())?;
        Ok(self.handler(container_name, controller))
    }

    fn create_resource_handler(
        &self,
        container_name: &ContainerName,
        _spec: &ContainerSpec,
    ) -> Result<Box<dyn ResourceHandler>, Status> {
        let controller = self.memory.create(container_name.to_path())?;
        Ok(self.handler(container_name, controller))
    }
}

impl ResourceHandlerFactory for MemoryResourceHandlerFactory {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Memory
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
}

#[derive(Debug)]
struct MemoryResourceHandler {
    core: HandlerCore,
}

impl MemoryResourceHandler {
    fn apply(&self, memory: &MemorySpec, policy: UpdatePolicy) -> Result<(), Status> {
        let controller = self.core.memory()?;

        match policy {
            UpdatePolicy::Replace => {
                // swap accounting may be compiled out, so the swap limit is
                // only touched when the spec names it
                match memory.swap_limit {
                    Some(swap) => {
                        controller.set_limit_and_swap(memory.limit.unwrap_or(-1), swap)?
                    }
                    None => controller.set_limit(memory.limit.unwrap_or(-1))?,
                }
                controller.set_soft_limit(memory.reservation.unwrap_or(-1))?;
                controller.set_swappiness(memory.swappiness.unwrap_or(DEFAULT_SWAPPINESS))?;
                controller.set_oom_kill_disable(memory.oom_kill_disable.unwrap_or(false))?;
            }
            UpdatePolicy::Diff => {
                match (memory.limit, memory.swap_limit) {
                    (Some(limit), Some(swap)) => controller.set_limit_and_swap(limit, swap)?,
                    (Some(limit), None) => controller.set_limit(limit)?,
                    (None, Some(swap)) => controller.set_swap_limit(swap)?,
                    (None, None) => {}
                }
                if let Some(reservation) = memory.reservation {
                    controller.set_soft_limit(reservation)?;
                }
                if let Some(swappiness) = memory.swappiness {
                    controller.set_swappiness(swappiness)?;
                }
                if let Some(disable) = memory.oom_kill_disable {
                    controller.set_oom_kill_disable(disable)?;
                }
            }
        }

        Ok(())
    }
}

impl HasHandlerCore for MemoryResourceHandler {
    fn core(&self) -> &HandlerCore {
        &self.core
    }
}

impl ResourceHandler for MemoryResourceHandler {
    fn container_name(&self) -> &str {
        self.core.container_name().as_str()
    }

    fn resource_type(&self) -> ResourceType {
        self.core.resource_type()
    }

    fn update(&self, spec: &ContainerSpec, policy: UpdatePolicy) -> Result<(), Status> {
        let _guard = self.core.lock_updates();
        tracing::debug!("applying memory config for {}", self.core.container_name());

        match (&spec.memory, policy) {
            (Some(memory), _) => self.apply(memory, policy),
            (None, UpdatePolicy::Replace) => self.apply(&MemorySpec::default(), policy),
            (None, UpdatePolicy::Diff) => Ok(()),
        }
    }

    fn stats(&self, kind: StatsType, output: &mut ContainerStats) -> Result<(), Status> {
        let controller = self.core.memory()?;
        let stats = output.memory.get_or_insert_with(Default::default);

        set_if_present(controller.get_usage(), &mut stats.usage)?;
        set_if_present(controller.get_limit(), &mut stats.limit)?;
        set_if_present(controller.get_fail_count(), &mut stats.fail_count)?;

        if matches!(kind, StatsType::Full) {
            set_if_present(controller.get_max_usage(), &mut stats.max_usage)?;
            set_if_present(controller.get_swap_usage(), &mut stats.swap_usage)?;
            set_if_present(controller.get_swap_max_usage(), &mut stats.swap_max_usage)?;
            set_if_present(controller.get_swap_fail_count(), &mut stats.swap_fail_count)?;
            set_if_present(controller.get_swap_limit(), &mut stats.swap_limit)?;
            set_if_present(controller.get_stat(), &mut stats.stat)?;
            stats.cache = stats
                .stat
                .as_ref()
                .and_then(|stat| stat.get("cache").copied());
        }

        Ok(())
    }

    fn spec(&self, output: &mut ContainerSpec) -> Result<(), Status> {
        let controller = self.core.memory()?;
        let memory = output.memory.get_or_insert_with(Default::default);

        set_if_present(controller.get_limit(), &mut memory.limit)?;
        set_if_present(controller.get_soft_limit(), &mut memory.reservation)?;
        set_if_present(controller.get_swap_limit(), &mut memory.swap_limit)?;
        set_if_present(controller.get_swappiness(), &mut memory.swappiness)?;
        set_if_present(
            controller.get_oom_kill_disable(),
            &mut memory.oom_kill_disable,
        )?;

        Ok(())
    }

    fn register_notification(
        &self,
        event: &EventSpec,
        callback: EventCallback,
    ) -> Result<NotificationId, Status> {
        let controller = self.core.memory()?;

        match event {
            EventSpec::Oom => controller.register_oom(callback),
            EventSpec::MemoryThreshold { usage } => {
                controller.register_usage_threshold(*usage, callback)
            }
        }
    }

    fn enter(&self, tids: &[Pid]) -> Result<(), Status> {
        self.core.enter_all(tids)
    }

    fn destroy(self: Box<Self>) -> Result<(), DestroyError> {
        destroy_or_return(self)
    }
}
