//! Typed access to the devices cgroup whitelist.

use super::controller::CgroupController;
use super::factory::{ControllerFactory, TypedController};
use super::hierarchy::CgroupHierarchy;
use crate::spec::{DeviceRule, DeviceType};
use crate::status::Status;

const DEVICES_ALLOW: &str = "devices.allow";
const DEVICES_DENY: &str = "devices.deny";
const DEVICES_LIST: &str = "devices.list";

pub type DeviceControllerFactory = ControllerFactory<DeviceController>;

#[derive(Debug)]
pub struct DeviceController {
    base: CgroupController,
}

impl TypedController for DeviceController {
    const HIERARCHY: CgroupHierarchy = CgroupHierarchy::Devices;

    fn wrap(base: CgroupController) -> Self {
        DeviceController { base }
    }

    fn base(&self) -> &CgroupController {
        &self.base
    }
}

impl DeviceController {
    pub fn apply_rule(&self, rule: &DeviceRule) -> Result<(), Status> {
        let file = if rule.allow {
            DEVICES_ALLOW
        } else {
            DEVICES_DENY
        };

        self.base.set_param_str(file, &rule.to_string())
    }

    /// Revokes access to every device.
    pub fn deny_all(&self) -> Result<(), Status> {
        let all = DeviceRule {
            allow: false,
            dev_type: DeviceType::All,
            major: None,
            minor: None,
            access: "rwm".to_string(),
        };

        self.apply_rule(&all)
    }

    /// The kernel's view of the whitelist; all listed rules are allows.
    pub fn get_rules(&self) -> Result<Vec<DeviceRule>, Status> {
        let content = self.base.read_param(DEVICES_LIST)?;
        let path = self.base.path().join(DEVICES_LIST);

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                DeviceRule::parse_listed(line).map_err(|err| {
                    Status::internal(format!("bad entry in {}: {err}", path.display()))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::test::{set_fixture, test_cgroup_factory};

    fn device_controller(tmp: &Path) -> DeviceController {
        let factory = test_cgroup_factory(&[(CgroupHierarchy::Devices, tmp)]);
        DeviceControllerFactory::new(factory)
            .create(Path::new("/job"))
            .expect("create devices cgroup")
    }

    #[test]
    fn test_apply_allow_rule() {
        let tmp = tempfile::tempdir().unwrap();
        let devices = device_controller(tmp.path());
        set_fixture(devices.base().path(), DEVICES_ALLOW, "").unwrap();

        let rule = DeviceRule {
            allow: true,
            dev_type: DeviceType::Char,
            major: Some(1),
            minor: Some(3),
            access: "rwm".to_string(),
        };
        devices.apply_rule(&rule).expect("apply rule");

        let content = fs::read_to_string(devices.base().path().join(DEVICES_ALLOW)).unwrap();
        assert_eq!(content, "c 1:3 rwm");
    }

    #[test]
    fn test_deny_all_writes_wildcard_rule() {
        let tmp = tempfile::tempdir().unwrap();
        let devices = device_controller(tmp.path());
        set_fixture(devices.base().path(), DEVICES_DENY, "").unwrap();

        devices.deny_all().expect("deny all");

        let content = fs::read_to_string(devices.base().path().join(DEVICES_DENY)).unwrap();
        assert_eq!(content, "a *:* rwm");
    }

    #[test]
    fn test_get_rules_parses_device_list() {
        let tmp = tempfile::tempdir().unwrap();
        let devices = device_controller(tmp.path());
        set_fixture(
            devices.base().path(),
            DEVICES_LIST,
            "c 1:3 rwm\nb 8:* rw\n",
        )
        .unwrap();

        let rules = devices.get_rules().expect("read device list");
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| r.allow));
        assert_eq!(rules[1].dev_type, DeviceType::Block);
        assert_eq!(rules[1].minor, None);
    }
}
