//! Typed access to the cpuset cgroup.

use std::path::PathBuf;

use super::controller::CgroupController;
use super::factory::{ControllerFactory, TypedController};
use super::hierarchy::CgroupHierarchy;
use crate::status::Status;

const CGROUP_CPUSET_CPUS: &str = "cpuset.cpus";
const CGROUP_CPUSET_MEMS: &str = "cpuset.mems";

pub type CpusetControllerFactory = ControllerFactory<CpusetController>;

#[derive(Debug)]
pub struct CpusetController {
    base: CgroupController,
}

impl TypedController for CpusetController {
    const HIERARCHY: CgroupHierarchy = CgroupHierarchy::CpuSet;

    fn wrap(base: CgroupController) -> Self {
        CpusetController { base }
    }

    fn base(&self) -> &CgroupController {
        &self.base
    }
}

impl CpusetController {
    pub fn set_cpus(&self, cpus: &str) -> Result<(), Status> {
        self.base.set_param_str(CGROUP_CPUSET_CPUS, cpus)
    }

    pub fn set_mems(&self, mems: &str) -> Result<(), Status> {
        self.base.set_param_str(CGROUP_CPUSET_MEMS, mems)
    }

    pub fn get_cpus(&self) -> Result<String, Status> {
        Ok(self.base.read_param(CGROUP_CPUSET_CPUS)?.trim().to_owned())
    }

    pub fn get_mems(&self) -> Result<String, Status> {
        Ok(self.base.read_param(CGROUP_CPUSET_MEMS)?.trim().to_owned())
    }

    /// A freshly created cpuset rejects tasks until both masks hold a
    /// value, so empty masks are filled from the nearest configured
    /// ancestor.
    pub fn inherit_parent_masks(&self) -> Result<(), Status> {
        self.inherit_mask(CGROUP_CPUSET_CPUS)?;
        self.inherit_mask(CGROUP_CPUSET_MEMS)?;
        Ok(())
    }

    fn inherit_mask(&self, interface_file: &str) -> Result<(), Status> {
        let current = self.base.read_param(interface_file)?;
        if !current.trim().is_empty() {
            return Ok(());
        }

        // walk up until a populated mask or the hierarchy mount is reached
        let mut empty_dirs: Vec<PathBuf> = vec![self.base.path().to_path_buf()];
        let mut ancestor = self.base.path().parent();
        let mut inherited = None;

        while let Some(dir) = ancestor {
            let mask_file = dir.join(interface_file);
            if !mask_file.exists() {
                break;
            }

            let value = std::fs::read_to_string(&mask_file).map_err(|err| {
                Status::internal(format!("failed to read {}: {err}", mask_file.display()))
            })?;
            if !value.trim().is_empty() {
                inherited = Some(value.trim().to_owned());
                break;
            }

            empty_dirs.push(dir.to_path_buf());
            ancestor = dir.parent();
        }

        let Some(value) = inherited else {
            return Err(Status::failed_precondition(format!(
                "no ancestor of {} has a {interface_file} value to inherit",
                self.base.path().display()
            )));
        };

        // fill top-down so each child sees a configured parent
        for dir in empty_dirs.iter().rev() {
            crate::common::write_cgroup_file_str(dir.join(interface_file), &value)
                .map_err(Status::from)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::test::{set_fixture, test_cgroup_factory};

    fn cpuset_controller(tmp: &Path, name: &str) -> CpusetController {
        let factory = test_cgroup_factory(&[(CgroupHierarchy::CpuSet, tmp)]);
        CpusetControllerFactory::new(factory)
            .create(Path::new(name))
            .expect("create cpuset cgroup")
    }

    #[test]
    fn test_set_cpus() {
        let tmp = tempfile::tempdir().unwrap();
        let cpuset = cpuset_controller(tmp.path(), "/job");
        set_fixture(cpuset.base().path(), CGROUP_CPUSET_CPUS, "").unwrap();

        cpuset.set_cpus("1-3").expect("set cpus");

        let content = fs::read_to_string(cpuset.base().path().join(CGROUP_CPUSET_CPUS)).unwrap();
        assert_eq!(content, "1-3");
    }

    #[test]
    fn test_set_mems() {
        let tmp = tempfile::tempdir().unwrap();
        let cpuset = cpuset_controller(tmp.path(), "/job");
        set_fixture(cpuset.base().path(), CGROUP_CPUSET_MEMS, "").unwrap();

        cpuset.set_mems("0-1").expect("set mems");

        let content = fs::read_to_string(cpuset.base().path().join(CGROUP_CPUSET_MEMS)).unwrap();
        assert_eq!(content, "0-1");
    }

    #[test]
    fn test_inherit_parent_masks_fills_empty_children() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixture(tmp.path(), CGROUP_CPUSET_CPUS, "0-7\n").unwrap();
        set_fixture(tmp.path(), CGROUP_CPUSET_MEMS, "0\n").unwrap();

        let cpuset = cpuset_controller(tmp.path(), "/batch/job");
        let parent = tmp.path().join("batch");
        set_fixture(&parent, CGROUP_CPUSET_CPUS, "").unwrap();
        set_fixture(&parent, CGROUP_CPUSET_MEMS, "").unwrap();
        set_fixture(cpuset.base().path(), CGROUP_CPUSET_CPUS, "").unwrap();
        set_fixture(cpuset.base().path(), CGROUP_CPUSET_MEMS, "").unwrap();

        cpuset.inherit_parent_masks().expect("inherit masks");

        assert_eq!(
            fs::read_to_string(parent.join(CGROUP_CPUSET_CPUS)).unwrap(),
            "0-7"
        );
        assert_eq!(cpuset.get_cpus().unwrap(), "0-7");
        assert_eq!(cpuset.get_mems().unwrap(), "0");
    }

    #[test]
    fn test_inherit_parent_masks_keeps_configured_values() {
        let tmp = tempfile::tempdir().unwrap();
        let cpuset = cpuset_controller(tmp.path(), "/job");
        set_fixture(cpuset.base().path(), CGROUP_CPUSET_CPUS, "2\n").unwrap();
        set_fixture(cpuset.base().path(), CGROUP_CPUSET_MEMS, "0\n").unwrap();

        cpuset.inherit_parent_masks().expect("inherit masks");

        assert_eq!(cpuset.get_cpus().unwrap(), "2");
    }

    #[test]
    fn test_inherit_without_configured_ancestor_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let cpuset = cpuset_controller(tmp.path(), "/job");
        set_fixture(cpuset.base().path(), CGROUP_CPUSET_CPUS, "").unwrap();
        // no cpuset.cpus on the mount root at all

        let status = cpuset.inherit_parent_masks().unwrap_err();
        assert_eq!(
            status.code(),
            crate::status::StatusCode::FailedPrecondition
        );
    }
}
