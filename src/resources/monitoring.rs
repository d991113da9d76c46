//! Monitoring resource.
//!
//! Owns the container's perf cgroup so that it is created and destroyed in
//! lock-step with the container; profiling tools scope their sessions to
//! it. There is nothing to configure, read or observe, so every operation
//! besides the lifecycle ones is a no-op.

use std::sync::Arc;

use nix::unistd::Pid;

use super::handler::{
    destroy_or_return, AnyController, CgroupHandlerFactory, HandlerCore, HasHandlerCore,
};
use super::{DestroyError, ResourceHandler, ResourceHandlerFactory, ResourceType};
use crate::cgroup::perf_event::{PerfController, PerfControllerFactory};
use crate::cgroup::CgroupFactory;
use crate::common::ContainerName;
use crate::events::{EventCallback, NotificationId};
use crate::spec::{ContainerSpec, EventSpec, StatsType, UpdatePolicy};
use crate::stats::ContainerStats;
use crate::status::Status;

pub struct MonitoringResourceHandlerFactory {
    perf: PerfControllerFactory,
}

impl MonitoringResourceHandlerFactory {
    pub fn new(cgroups: &Arc<CgroupFactory>) -> Result<Self, Status> {
        if !cgroups.is_mounted(PerfControllerFactory::hierarchy_type()) {
            return Err(Status::not_found(
                "monitoring resource depends on the perf cgroup hierarchy",
            ));
        }

        Ok(MonitoringResourceHandlerFactory {
            perf: PerfControllerFactory::new(Arc::clone(cgroups)),
        })
    }

    fn handler(
        &self,
        container_name: &ContainerName,
        controller: PerfController,
    ) -> Box<dyn ResourceHandler> {
        Box::new(MonitoringResourceHandler {
            core: HandlerCore::new(
                container_name.clone(),
                ResourceType::Monitoring,
                vec![AnyController::PerfEvent(controller)],
            ),
        })
    }
}

impl CgroupHandlerFactory for MonitoringResourceHandlerFactory {
    fn get_resource_handler(
        &self,
        container_name: &ContainerName,
    ) -> Result<Box<dyn ResourceHandler>, Status> {
        let controller = self.perf.get(container_name.to_path())?;
        Ok(self.handler(container_name, controller))
    }

    fn create_resource_handler(
        &self,
        container_name: &ContainerName,
        _spec: &ContainerSpec,
    ) -> Result<Box<dyn ResourceHandler>, Status> {
        let controller = self.perf.create(container_name.to_path())?;
        Ok(self.handler(container_name, controller))
    }
}

impl ResourceHandlerFactory for MonitoringResourceHandlerFactory {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Monitoring
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
struct MonitoringResourceHandler {
    core: HandlerCore,
}

impl HasHandlerCore for MonitoringResourceHandler {
    fn core(&self) -> &HandlerCore {
        &self.core
    }
}

impl ResourceHandler for MonitoringResourceHandler {
    fn container_name(&self) -> &str {
        self.core.container_name().as_str()
    }

    fn resource_type(&self) -> ResourceType {
        self.core.resource_type()
    }

    fn update(&self, _spec: &ContainerSpec, _policy: UpdatePolicy) -> Result<(), Status> {
        Ok(())
    }

    fn stats(&self, _kind: StatsType, _output: &mut ContainerStats) -> Result<(), Status> {
        Ok(())
    }

    fn spec(&self, _output: &mut ContainerSpec) -> Result<(), Status> {
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
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::cgroup::CgroupHierarchy;
    use crate::status::StatusCode;
    use crate::test::test_cgroup_factory;

    fn factory(tmp: &Path) -> MonitoringResourceHandlerFactory {
        let cgroups = test_cgroup_factory(&[(CgroupHierarchy::PerfEvent, tmp)]);
        MonitoringResourceHandlerFactory::new(&cgroups).expect("construct monitoring factory")
    }

    #[test]
    fn test_unmounted_perf_hierarchy_fails_construction() {
        let tmp = tempfile::tempdir().unwrap();
        let cgroups = test_cgroup_factory(&[(CgroupHierarchy::Memory, tmp.path())]);

        let status = MonitoringResourceHandlerFactory::new(&cgroups)
            .err()
            .expect("must fail");
        assert!(status.is_not_found());
        assert_eq!(
            status.message(),
            "monitoring resource depends on the perf cgroup hierarchy"
        );
    }

    #[test]
    fn test_full_lifecycle() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = factory(tmp.path());

        // create the container's perf cgroup with an all-default spec
        let handler = factory
            .create("/job1", &ContainerSpec::default())
            .expect("create monitoring handler");
        assert!(tmp.path().join("job1").exists());
        assert_eq!(handler.resource_type(), ResourceType::Monitoring);
        assert_eq!(handler.container_name(), "/job1");

        // update and stats accept anything and report nothing
        handler
            .update(&ContainerSpec::default(), UpdatePolicy::Replace)
            .expect("no-op update");
        let mut stats = ContainerStats::default();
        handler
            .stats(StatsType::Full, &mut stats)
            .expect("no-op stats");
        assert_eq!(stats, ContainerStats::default());

        // no event is handled; the callback must be released
        let invoked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&invoked);
        let status = handler
            .register_notification(
                &EventSpec::Oom,
                Box::new(move |_| flag.store(true, Ordering::Relaxed)),
            )
            .unwrap_err();
        assert!(status.is_not_found());
        assert_eq!(status.message(), "no handled event found");
        assert!(!invoked.load(Ordering::Relaxed));

        // destroy consumes the handler and removes the cgroup
        handler.destroy().expect("destroy monitoring handler");
        assert!(!tmp.path().join("job1").exists());
    }

    #[test]
    fn test_create_then_get_then_destroy_then_get() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = factory(tmp.path());

        factory
            .create("/job1", &ContainerSpec::default())
            .expect("create monitoring handler");

        let fetched = factory.get("/job1").expect("get existing handler");
        fetched.destroy().expect("destroy fetched handler");

        let status = factory.get("/job1").unwrap_err();
        assert_eq!(status.code(), StatusCode::NotFound);
    }

    #[test]
    fn test_create_twice_already_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = factory(tmp.path());

        factory
            .create("/job1", &ContainerSpec::default())
            .expect("create monitoring handler");
        let status = factory
            .create("/job1", &ContainerSpec::default())
            .unwrap_err();
        assert_eq!(status.code(), StatusCode::AlreadyExists);
    }
}
