//! Cpuset resource: cpu and memory-node placement masks.

use std::sync::Arc;

use nix::unistd::Pid;

use super::handler::{
    destroy_or_return, AnyController, CgroupHandlerFactory, HandlerCore, HasHandlerCore,
};
use super::{DestroyError, ResourceHandler, ResourceHandlerFactory, ResourceType};
use crate::cgroup::cpuset::{CpusetController, CpusetControllerFactory};
use crate::cgroup::{CgroupFactory, TypedController};
use crate::common::ContainerName;
use crate::events::{EventCallback, NotificationId};
use crate::spec::{ContainerSpec, CpusetSpec, EventSpec, StatsType, UpdatePolicy};
use crate::stats::{set_if_present, ContainerStats};
use crate::status::Status;

pub struct CpusetResourceHandlerFactory {
    cpuset: CpusetControllerFactory,
}

impl CpusetResourceHandlerFactory {
    pub fn new(cgroups: &Arc<CgroupFactory>) -> Result<Self, Status> {
        if !cgroups.is_mounted(CpusetControllerFactory::hierarchy_type()) {
            return Err(Status::not_found(
                "cpuset resource depends on the cpuset cgroup hierarchy",
            ));
        }

        Ok(CpusetResourceHandlerFactory {
            cpuset: CpusetControllerFactory::new(Arc::clone(cgroups)),
        })
    }

    fn handler(
        &self,
        container_name: &ContainerName,
        controller: CpusetController,
    ) -> Box<dyn ResourceHandler> {
        Box::new(CpusetResourceHandler {
            core: HandlerCore::new(
                container_name.clone(),
                ResourceType::Cpuset,
                vec![AnyController::CpuSet(controller)],
            ),
        })
    }
}

impl CgroupHandlerFactory for CpusetResourceHandlerFactory {
    fn get_resource_handler(
        &self,
        container_name: &ContainerName,
    ) -> Result<Box<dyn ResourceHandler>, Status> {
        let controller = self.cpuset.get(container_name.to_path())?;
        Ok(self.handler(container_name, controller))
    }

    fn create_resource_handler(
        &self,
        container_name: &ContainerName,
        _spec: &ContainerSpec,
    ) -> Result<Box<dyn ResourceHandler>, Status> {
        let controller = self.cpuset.create(container_name.to_path())?;
        // a cpuset with empty masks rejects every task
        if let Err(status) = controller.inherit_parent_masks() {
            if let Err(destroy_status) = controller.base().destroy() {
                tracing::warn!(
                    "failed to roll back cpuset cgroup for {}: {}",
                    container_name,
                    destroy_status
                );
            }
            return Err(status);
        }

        Ok(self.handler(container_name, controller))
    }
}

impl ResourceHandlerFactory for CpusetResourceHandlerFactory {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Cpuset
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
struct CpusetResourceHandler {
    core: HandlerCore,
}

impl CpusetResourceHandler {
    /// Masks have no kernel default other than what was inherited from
    /// the parent at creation, so both policies only write the masks the
    /// spec names.
    fn apply(&self, cpuset: &CpusetSpec) -> Result<(), Status> {
        let controller = self.core.cpuset()?;

        if let Some(cpus) = &cpuset.cpus {
            controller.set_cpus(cpus)?;
        }
        if let Some(mems) = &cpuset.mems {
            controller.set_mems(mems)?;
        }

        Ok(())
    }
}

impl HasHandlerCore for CpusetResourceHandler {
    fn core(&self) -> &HandlerCore {
        &self.core
    }
}

impl ResourceHandler for CpusetResourceHandler {
    fn container_name(&self) -> &str {
        self.core.container_name().as_str()
    }

    fn resource_type(&self) -> ResourceType {
        self.core.resource_type()
    }

    fn update(&self, spec: &ContainerSpec, _policy: UpdatePolicy) -> Result<(), Status> {
        let _guard = self.core.lock_updates();
        tracing::debug!("applying cpuset config for {}", self.core.container_name());

        match &spec.cpuset {
            Some(cpuset) => self.apply(cpuset),
            None => Ok(()),
        }
    }

    fn stats(&self, _kind: StatsType, _output: &mut ContainerStats) -> Result<(), Status> {
        // cpuset exports no statistics
        Ok(())
    }

    fn spec(&self, output: &mut ContainerSpec) -> Result<(), Status> {
        let controller = self.core.cpuset()?;
        let cpuset = output.cpuset.get_or_insert_with(Default::default);

        set_if_present(controller.get_cpus(), &mut cpuset.cpus)?;
        set_if_present(controller.get_mems(), &mut cpuset.mems)?;

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

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::cgroup::CgroupHierarchy;
    use crate::test::{set_fixture, test_cgroup_factory};

    fn factory(tmp: &Path) -> CpusetResourceHandlerFactory {
        set_fixture(tmp, "cpuset.cpus", "0-7\n").unwrap();
        set_fixture(tmp, "cpuset.mems", "0\n").unwrap();
        let cgroups = test_cgroup_factory(&[(CgroupHierarchy::CpuSet, tmp)]);
        CpusetResourceHandlerFactory::new(&cgroups).expect("construct cpuset factory")
    }

    /// Fakes the kernel populating a fresh cpuset with empty mask files.
    fn seeded_handler(tmp: &Path, cpus: &str, mems: &str) -> Box<dyn ResourceHandler> {
        let factory = factory(tmp);
        let dir = tmp.join("job");
        std::fs::create_dir_all(&dir).unwrap();
        set_fixture(&dir, "cpuset.cpus", cpus).unwrap();
        set_fixture(&dir, "cpuset.mems", mems).unwrap();
        factory.get("/job").expect("get cpuset handler")
    }

    #[test]
    fn test_create_rolls_back_when_masks_cannot_be_inherited() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = factory(tmp.path());

        // the fake filesystem has no mask files inside the new cgroup, so
        // inheritance cannot run and creation must clean up after itself
        let status = factory
            .create("/job", &ContainerSpec::default())
            .unwrap_err();

        assert!(status.is_not_found());
        assert!(!tmp.path().join("job").exists());
    }

    #[test]
    fn test_update_writes_requested_masks() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = seeded_handler(tmp.path(), "0-7\n", "0\n");

        let spec = ContainerSpec {
            cpuset: Some(CpusetSpec {
                cpus: Some("1-2".to_string()),
                mems: None,
            }),
            ..Default::default()
        };
        handler.update(&spec, UpdatePolicy::Diff).expect("update cpus");

        let mut out = ContainerSpec::default();
        handler.spec(&mut out).expect("read back spec");
        let cpuset = out.cpuset.expect("cpuset spec present");
        assert_eq!(cpuset.cpus.as_deref(), Some("1-2"));
        // mems untouched
        assert_eq!(cpuset.mems.as_deref(), Some("0"));
    }

    #[test]
    fn test_replace_without_masks_keeps_the_inherited_ones() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = seeded_handler(tmp.path(), "0-7\n", "0\n");

        handler
            .update(&ContainerSpec::default(), UpdatePolicy::Replace)
            .expect("replace update");

        let mut out = ContainerSpec::default();
        handler.spec(&mut out).expect("read back spec");
        let cpuset = out.cpuset.expect("cpuset spec present");
        assert_eq!(cpuset.cpus.as_deref(), Some("0-7"));
        assert_eq!(cpuset.mems.as_deref(), Some("0"));
    }

    #[test]
    fn test_stats_are_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = seeded_handler(tmp.path(), "0-7\n", "0\n");

        let mut out = ContainerStats::default();
        handler
            .stats(StatsType::Full, &mut out)
            .expect("collect stats");
        assert_eq!(out, ContainerStats::default());
    }
}
