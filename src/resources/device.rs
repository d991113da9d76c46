//! Device resource: the cgroup device access whitelist.

use std::sync::Arc;

use nix::unistd::Pid;

use super::handler::{
    destroy_or_return, AnyController, CgroupHandlerFactory, HandlerCore, HasHandlerCore,
};
use super::{DestroyError, ResourceHandler, ResourceHandlerFactory, ResourceType};
use crate::cgroup::devices::{DeviceController, DeviceControllerFactory};
use crate::cgroup::CgroupFactory;
use crate::common::ContainerName;
use crate::events::{EventCallback, NotificationId};
use crate::spec::{ContainerSpec, DeviceSpec, EventSpec, StatsType, UpdatePolicy};
use crate::stats::ContainerStats;
use crate::status::Status;

pub struct DeviceResourceHandlerFactory {
    devices: DeviceControllerFactory,
}

impl DeviceResourceHandlerFactory {
    pub fn new(cgroups: &Arc<CgroupFactory>) -> Result<Self, Status> {
        if !cgroups.is_mounted(DeviceControllerFactory::hierarchy_type()) {
            return Err(Status::not_found(
                "device resource depends on the devices cgroup hierarchy",
            ));
        }

        Ok(DeviceResourceHandlerFactory {
            devices: DeviceControllerFactory::new(Arc::clone(cgroups)),
        })
    }

    fn handler(
        &self,
        container_name: &ContainerName,
        controller: DeviceController,
    ) -> Box<dyn ResourceHandler> {
        Box::new(DeviceResourceHandler {
            core: HandlerCore::new(
                container_name.clone(),
                ResourceType::Device,
                vec![AnyController::Devices(controller)],
            ),
        })
    }
}

impl CgroupHandlerFactory for DeviceResourceHandlerFactory {
    fn get_resource_handler(
        &self,
        container_name: &ContainerName,
    ) -> Result<Box<dyn ResourceHandler>, Status> {
        let controller = self.devices.get(container_name.to_path())?;
        Ok(self.handler(container_name, controller))
    }

    fn create_resource_handler(
        &self,
        container_name: &ContainerName,
        _spec: &ContainerSpec,
    ) -> Result<Box<dyn ResourceHandler>, Status> {
        let controller = self.devices.create(container_name.to_path())?;
        Ok(self.handler(container_name, controller))
    }
}

impl ResourceHandlerFactory for DeviceResourceHandlerFactory {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Device
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
struct DeviceResourceHandler {
    core: HandlerCore,
}

impl DeviceResourceHandler {
    fn apply(&self, devices: &DeviceSpec, policy: UpdatePolicy) -> Result<(), Status> {
        let controller = self.core.devices()?;

        // a replace starts from a closed whitelist
        if matches!(policy, UpdatePolicy::Replace) {
            controller.deny_all()?;
        }

        for rule in &devices.rules {
            controller.apply_rule(rule)?;
        }

        Ok(())
    }
}

impl HasHandlerCore for DeviceResourceHandler {
    fn core(&self) -> &HandlerCore {
        &self.core
    }
}

impl ResourceHandler for DeviceResourceHandler {
    fn container_name(&self) -> &str {
        self.core.container_name().as_str()
    }

    fn resource_type(&self) -> ResourceType {
        self.core.resource_type()
    }

    fn update(&self, spec: &ContainerSpec, policy: UpdatePolicy) -> Result<(), Status> {
        let _guard = self.core.lock_updates();
        tracing::debug!("applying device config for {}", self.core.container_name());

        match (&spec.devices, policy) {
            (Some(devices), _) => self.apply(devices, policy),
            (None, UpdatePolicy::Replace) => self.apply(&DeviceSpec::default(), policy),
            (None, UpdatePolicy::Diff) => Ok(()),
        }
    }

    fn stats(&self, _kind: StatsType, _output: &mut ContainerStats) -> Result<(), Status> {
        // the devices cgroup exports no statistics
        Ok(())
    }

    fn spec(&self, output: &mut ContainerSpec) -> Result<(), Status> {
        let controller = self.core.devices()?;
        let devices = output.devices.get_or_insert_with(Default::default);

        match controller.get_rules() {
            Ok(rules) => devices.rules = rules,
            Err(status) if status.is_not_found() => {}
            Err(status) => return Err(status),
        }

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
    use crate::spec::{DeviceRule, DeviceType};
    use crate::test::{set_fixture, test_cgroup_factory};

    fn seeded_handler(tmp: &Path) -> Box<dyn ResourceHandler> {
        let cgroups = test_cgroup_factory(&[(CgroupHierarchy::Devices, tmp)]);
        let factory =
            DeviceResourceHandlerFactory::new(&cgroups).expect("construct device factory");

        let dir = tmp.join("job");
        std::fs::create_dir_all(&dir).unwrap();
        set_fixture(&dir, "devices.allow", "").unwrap();
        set_fixture(&dir, "devices.deny", "").unwrap();
        set_fixture(&dir, "devices.list", "a *:* rwm\n").unwrap();
        factory.get("/job").expect("get device handler")
    }

    fn null_device_rule() -> DeviceRule {
        DeviceRule {
            allow: true,
            dev_type: DeviceType::Char,
            major: Some(1),
            minor: Some(3),
            access: "rwm".to_string(),
        }
    }

    #[test]
    fn test_replace_denies_all_before_allowing() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = seeded_handler(tmp.path());

        let spec = ContainerSpec {
            devices: Some(DeviceSpec {
                rules: vec![null_device_rule()],
            }),
            ..Default::default()
        };
        handler
            .update(&spec, UpdatePolicy::Replace)
            .expect("replace device rules");

        let dir = tmp.path().join("job");
        assert_eq!(
            std::fs::read_to_string(dir.join("devices.deny")).unwrap(),
            "a *:* rwm"
        );
        assert_eq!(
            std::fs::read_to_string(dir.join("devices.allow")).unwrap(),
            "c 1:3 rwm"
        );
    }

    #[test]
    fn test_diff_applies_rules_without_clearing() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = seeded_handler(tmp.path());

        let spec = ContainerSpec {
            devices: Some(DeviceSpec {
                rules: vec![null_device_rule()],
            }),
            ..Default::default()
        };
        handler
            .update(&spec, UpdatePolicy::Diff)
            .expect("diff device rules");

        let dir = tmp.path().join("job");
        assert_eq!(std::fs::read_to_string(dir.join("devices.deny")).unwrap(), "");
        assert_eq!(
            std::fs::read_to_string(dir.join("devices.allow")).unwrap(),
            "c 1:3 rwm"
        );
    }

    #[test]
    fn test_spec_reads_the_device_list() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = seeded_handler(tmp.path());

        let mut out = ContainerSpec::default();
        handler.spec(&mut out).expect("read back spec");

        let devices = out.devices.expect("device spec present");
        assert_eq!(devices.rules.len(), 1);
        assert_eq!(devices.rules[0].dev_type, DeviceType::All);
        assert!(devices.rules[0].allow);
    }
}
