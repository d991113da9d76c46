//! Base handle to a single cgroup directory on one hierarchy.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::errno::Errno;
use nix::unistd::Pid;

use super::hierarchy::CgroupHierarchy;
use crate::common::{WrappedIoError, CGROUP_TASKS};
use crate::events::{EventCallback, EventFdNotifications, NotificationId};
use crate::kernel::KernelApi;
use crate::stats;
use crate::status::Status;

/// Owned handle to one subsystem's cgroup directory. A controller exists
/// exactly as long as its directory does; typed per-subsystem wrappers add
/// the subsystem file accessors on top.
#[derive(Debug)]
pub struct CgroupController {
    hierarchy: CgroupHierarchy,
    cgroup_path: PathBuf,
    owns_cgroup: bool,
    kernel: Arc<KernelApi>,
    notifications: Arc<EventFdNotifications>,
}

impl CgroupController {
    pub(crate) fn new(
        hierarchy: CgroupHierarchy,
        cgroup_path: PathBuf,
        owns_cgroup: bool,
        kernel: Arc<KernelApi>,
        notifications: Arc<EventFdNotifications>,
    ) -> Self {
        CgroupController {
            hierarchy,
            cgroup_path,
            owns_cgroup,
            kernel,
            notifications,
        }
    }

    pub fn hierarchy(&self) -> CgroupHierarchy {
        self.hierarchy
    }

    pub fn path(&self) -> &Path {
        &self.cgroup_path
    }

    pub fn exists(&self) -> bool {
        self.kernel.file_exists(&self.cgroup_path)
    }

    /// Moves one thread into this cgroup.
    pub fn enter(&self, tid: Pid) -> Result<(), Status> {
        let tasks_path = self.cgroup_path.join(CGROUP_TASKS);
        self.kernel
            .write_file(&tasks_path, tid)
            .map_err(|err| match err.inner().raw_os_error().map(Errno::from_i32) {
                Some(Errno::ESRCH) | Some(Errno::EINVAL) => Status::invalid_argument(format!(
                    "cannot move tid {tid} into {}: {err}",
                    tasks_path.display()
                )),
                _ => err.into(),
            })
    }

    /// Removes the backing cgroup directory. Succeeds without touching the
    /// kernel when the directory is already gone or is managed externally,
    /// so a partially destroyed handler can be retried.
    pub fn destroy(&self) -> Result<(), Status> {
        if !self.owns_cgroup || !self.exists() {
            return Ok(());
        }

        tracing::debug!("removing cgroup {}", self.cgroup_path.display());
        self.kernel
            .remove_dir(&self.cgroup_path)
            .map_err(|err| Status::internal(err.to_string()))
    }

    pub(crate) fn set_param<T: ToString>(&self, file: &str, value: T) -> Result<(), Status> {
        Ok(self.try_set_param(file, value)?)
    }

    /// Like `set_param`, but keeps the raw I/O error so callers can inspect
    /// the errno.
    pub(crate) fn try_set_param<T: ToString>(
        &self,
        file: &str,
        value: T,
    ) -> Result<(), WrappedIoError> {
        self.kernel.write_file(&self.cgroup_path.join(file), value)
    }

    pub(crate) fn set_param_str(&self, file: &str, value: &str) -> Result<(), Status> {
        Ok(self
            .kernel
            .write_file_str(&self.cgroup_path.join(file), value)?)
    }

    pub(crate) fn read_param(&self, file: &str) -> Result<String, Status> {
        Ok(self.kernel.read_file(&self.cgroup_path.join(file))?)
    }

    pub(crate) fn read_value(&self, file: &str) -> Result<u64, Status> {
        Ok(stats::parse_single_value(&self.cgroup_path.join(file))?)
    }

    /// Reads a signed limit value. The kernel reports "no limit" as either
    /// `max` or a page-rounded `LLONG_MAX`; both map to -1.
    pub(crate) fn read_limit(&self, file: &str) -> Result<i64, Status> {
        const UNLIMITED: u64 = 9223372036854771712;

        let value = self.read_value(file)?;
        if value >= UNLIMITED {
            return Ok(-1);
        }

        i64::try_from(value).map_err(|_| {
            Status::internal(format!(
                "limit {value} in {} does not fit a signed value",
                self.cgroup_path.join(file).display()
            ))
        })
    }

    pub(crate) fn read_flat_keyed(&self, file: &str) -> Result<HashMap<String, u64>, Status> {
        Ok(stats::parse_flat_keyed_data(&self.cgroup_path.join(file))?)
    }

    pub(crate) fn register_notification(
        &self,
        event_file: &str,
        args: &str,
        callback: EventCallback,
    ) -> Result<NotificationId, Status> {
        self.notifications
            .register_notification(&self.cgroup_path, event_file, args, callback)
    }
}
