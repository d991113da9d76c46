//! Discovery of mounted cgroup hierarchies and construction of controllers.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use procfs::process::Process;
use procfs::ProcError;

use super::controller::CgroupController;
use super::hierarchy::{CgroupHierarchy, HIERARCHIES};
use crate::common::PathBufExt;
use crate::events::EventFdNotifications;
use crate::kernel::KernelApi;
use crate::status::Status;

#[derive(thiserror::Error, Debug)]
pub enum MountPointError {
    #[error("failed to read process info from /proc/self: {0}")]
    ReadSelf(ProcError),
    #[error("failed to get mountinfo: {0}")]
    MountInfo(ProcError),
}

/// Process-wide service that knows which cgroup subsystems are mounted and
/// which of them this process owns, and constructs controllers on them.
/// Read-only after construction; outlives every handler built from it.
pub struct CgroupFactory {
    mount_points: HashMap<CgroupHierarchy, PathBuf>,
    owned: HashSet<CgroupHierarchy>,
    kernel: Arc<KernelApi>,
    notifications: Arc<EventFdNotifications>,
}

impl CgroupFactory {
    /// Scans the mount table. Every discovered hierarchy is treated as
    /// owned by this process.
    pub fn new(
        kernel: Arc<KernelApi>,
        notifications: Arc<EventFdNotifications>,
    ) -> Result<Self, MountPointError> {
        let mount_points = discover_mount_points()?;
        for hierarchy in HIERARCHIES {
            if !mount_points.contains_key(hierarchy) {
                tracing::warn!("cgroup hierarchy {} is not mounted on this system", hierarchy);
            }
        }

        let owned = mount_points.keys().copied().collect();
        Ok(CgroupFactory {
            mount_points,
            owned,
            kernel,
            notifications,
        })
    }

    /// Builds a factory from an explicit mount layout, for embedders whose
    /// cgroups are managed externally (and for tests).
    pub fn with_mount_points(
        mount_points: HashMap<CgroupHierarchy, PathBuf>,
        owned: HashSet<CgroupHierarchy>,
        kernel: Arc<KernelApi>,
        notifications: Arc<EventFdNotifications>,
    ) -> Self {
        CgroupFactory {
            mount_points,
            owned,
            kernel,
            notifications,
        }
    }

    pub fn is_mounted(&self, hierarchy: CgroupHierarchy) -> bool {
        self.mount_points.contains_key(&hierarchy)
    }

    pub fn owns_cgroup(&self, hierarchy: CgroupHierarchy) -> bool {
        self.owned.contains(&hierarchy)
    }

    pub fn mount_point(&self, hierarchy: CgroupHierarchy) -> Option<&Path> {
        self.mount_points.get(&hierarchy).map(PathBuf::as_path)
    }

    pub fn kernel(&self) -> Arc<KernelApi> {
        Arc::clone(&self.kernel)
    }

    pub fn notifications(&self) -> Arc<EventFdNotifications> {
        Arc::clone(&self.notifications)
    }

    fn cgroup_path(
        &self,
        hierarchy: CgroupHierarchy,
        hierarchy_path: &Path,
    ) -> Result<PathBuf, Status> {
        let mount_point = self.mount_points.get(&hierarchy).ok_or_else(|| {
            Status::not_found(format!("cgroup hierarchy {hierarchy} is not mounted"))
        })?;

        Ok(mount_point.join_safely(hierarchy_path)?)
    }

    /// Looks up the controller for an existing cgroup. Does not create
    /// directories.
    pub fn get_controller(
        &self,
        hierarchy: CgroupHierarchy,
        hierarchy_path: &Path,
    ) -> Result<CgroupController, Status> {
        let path = self.cgroup_path(hierarchy, hierarchy_path)?;
        if !self.kernel.file_exists(&path) {
            return Err(Status::not_found(format!(
                "cgroup {} does not exist on hierarchy {hierarchy}",
                path.display()
            )));
        }

        Ok(self.controller(hierarchy, path))
    }

    /// Creates the cgroup directory and returns its controller.
    pub fn create_controller(
        &self,
        hierarchy: CgroupHierarchy,
        hierarchy_path: &Path,
    ) -> Result<CgroupController, Status> {
        let path = self.cgroup_path(hierarchy, hierarchy_path)?;
        if self.kernel.file_exists(&path) {
            return Err(Status::already_exists(format!(
                "cgroup {} already exists on hierarchy {hierarchy}",
                path.display()
            )));
        }
        if !self.owns_cgroup(hierarchy) {
            return Err(Status::failed_precondition(format!(
                "cgroup hierarchy {hierarchy} is managed externally; cannot create {}",
                path.display()
            )));
        }

        tracing::debug!("creating cgroup {}", path.display());
        self.kernel.create_dir(&path)?;
        Ok(self.controller(hierarchy, path))
    }

    fn controller(&self, hierarchy: CgroupHierarchy, path: PathBuf) -> CgroupController {
        CgroupController::new(
            hierarchy,
            path,
            self.owns_cgroup(hierarchy),
            Arc::clone(&self.kernel),
            Arc::clone(&self.notifications),
        )
    }
}

/// Typed access to cgroup controllers. Implemented by each per-subsystem
/// controller wrapper.
pub trait TypedController: Sized {
    const HIERARCHY: CgroupHierarchy;

    fn wrap(base: CgroupController) -> Self;
    fn base(&self) -> &CgroupController;
}

/// Constructs controllers of one concrete type, checking directory
/// existence on get and creating directories on create.
pub struct ControllerFactory<T> {
    cgroups: Arc<CgroupFactory>,
    _controller: PhantomData<T>,
}

impl<T: TypedController> ControllerFactory<T> {
    pub fn new(cgroups: Arc<CgroupFactory>) -> Self {
        ControllerFactory {
            cgroups,
            _controller: PhantomData,
        }
    }

    /// The single hierarchy this controller type depends on.
    pub fn hierarchy_type() -> CgroupHierarchy {
        T::HIERARCHY
    }

    pub fn get(&self, hierarchy_path: &Path) -> Result<T, Status> {
        Ok(T::wrap(
            self.cgroups.get_controller(T::HIERARCHY, hierarchy_path)?,
        ))
    }

    pub fn create(&self, hierarchy_path: &Path) -> Result<T, Status> {
        Ok(T::wrap(
            self.cgroups
                .create_controller(T::HIERARCHY, hierarchy_path)?,
        ))
    }
}

fn discover_mount_points() -> Result<HashMap<CgroupHierarchy, PathBuf>, MountPointError> {
    let mounts: Vec<_> = Process::myself()
        .map_err(MountPointError::ReadSelf)?
        .mountinfo()
        .map_err(MountPointError::MountInfo)?
        .into_iter()
        .filter(|m| m.fs_type == "cgroup")
        .collect();

    let mut mount_points = HashMap::new();
    for hierarchy in HIERARCHIES {
        let found = mounts.iter().find(|m| {
            // cpu and cpuacct are commonly comounted in a shared directory
            match hierarchy {
                CgroupHierarchy::Cpu => {
                    m.mount_point.ends_with("cpu,cpuacct") || m.mount_point.ends_with("cpu")
                }
                CgroupHierarchy::CpuAcct => {
                    m.mount_point.ends_with("cpu,cpuacct") || m.mount_point.ends_with("cpuacct")
                }
                other => m.mount_point.ends_with(other.as_ref()),
            }
        });

        if let Some(mount) = found {
            mount_points.insert(*hierarchy, mount.mount_point.clone());
        }
    }

    Ok(mount_points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusCode;
    use crate::test::test_cgroup_factory;

    #[test]
    fn test_get_controller_requires_existing_cgroup() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = test_cgroup_factory(&[(CgroupHierarchy::Memory, tmp.path())]);

        let result = factory.get_controller(CgroupHierarchy::Memory, Path::new("/job"));
        assert_eq!(result.unwrap_err().code(), StatusCode::NotFound);
    }

    #[test]
    fn test_create_then_get_controller() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = test_cgroup_factory(&[(CgroupHierarchy::Memory, tmp.path())]);

        let created = factory
            .create_controller(CgroupHierarchy::Memory, Path::new("/job"))
            .expect("create cgroup");
        assert!(tmp.path().join("job").exists());

        let fetched = factory
            .get_controller(CgroupHierarchy::Memory, Path::new("/job"))
            .expect("get cgroup");
        assert_eq!(created.path(), fetched.path());
    }

    #[test]
    fn test_create_controller_twice_already_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = test_cgroup_factory(&[(CgroupHierarchy::Memory, tmp.path())]);

        factory
            .create_controller(CgroupHierarchy::Memory, Path::new("/job"))
            .expect("create cgroup");
        let result = factory.create_controller(CgroupHierarchy::Memory, Path::new("/job"));
        assert_eq!(result.unwrap_err().code(), StatusCode::AlreadyExists);
    }

    #[test]
    fn test_unmounted_hierarchy_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = test_cgroup_factory(&[(CgroupHierarchy::Memory, tmp.path())]);

        assert!(!factory.is_mounted(CgroupHierarchy::PerfEvent));
        let result = factory.get_controller(CgroupHierarchy::PerfEvent, Path::new("/job"));
        assert_eq!(result.unwrap_err().code(), StatusCode::NotFound);
    }

    #[test]
    fn test_create_on_unowned_hierarchy_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let kernel = Arc::new(KernelApi::new());
        let notifications = Arc::new(EventFdNotifications::new(Arc::clone(&kernel)));
        let factory = CgroupFactory::with_mount_points(
            HashMap::from([(CgroupHierarchy::Memory, tmp.path().to_path_buf())]),
            HashSet::new(),
            kernel,
            notifications,
        );

        let result = factory.create_controller(CgroupHierarchy::Memory, Path::new("/job"));
        assert_eq!(result.unwrap_err().code(), StatusCode::FailedPrecondition);
    }
}
