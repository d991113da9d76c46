//! Typed access to the memory cgroup.

use std::collections::HashMap;

use nix::errno::Errno;

use super::controller::CgroupController;
use super::factory::{ControllerFactory, TypedController};
use super::hierarchy::CgroupHierarchy;
use crate::events::{EventCallback, NotificationId};
use crate::status::Status;

const CGROUP_MEMORY_LIMIT: &str = "memory.limit_in_bytes";
const CGROUP_MEMORY_USAGE: &str = "memory.usage_in_bytes";
const CGROUP_MEMORY_MAX_USAGE: &str = "memory.max_usage_in_bytes";
const CGROUP_MEMORY_FAILCNT: &str = "memory.failcnt";
const CGROUP_MEMORY_RESERVATION: &str = "memory.soft_limit_in_bytes";
const CGROUP_MEMORY_SWAPPINESS: &str = "memory.swappiness";
const CGROUP_MEMORY_OOM_CONTROL: &str = "memory.oom_control";
// Shows various memory statistics
const CGROUP_MEMORY_STAT: &str = "memory.stat";

const CGROUP_MEMORY_SWAP_LIMIT: &str = "memory.memsw.limit_in_bytes";
const CGROUP_MEMORY_SWAP_USAGE: &str = "memory.memsw.usage_in_bytes";
const CGROUP_MEMORY_SWAP_MAX_USAGE: &str = "memory.memsw.max_usage_in_bytes";
const CGROUP_MEMORY_SWAP_FAILCNT: &str = "memory.memsw.failcnt";

pub type MemoryControllerFactory = ControllerFactory<MemoryController>;

#[derive(Debug)]
pub struct MemoryController {
    base: CgroupController,
}

impl TypedController for MemoryController {
    const HIERARCHY: CgroupHierarchy = CgroupHierarchy::Memory;

    fn wrap(base: CgroupController) -> Self {
        MemoryController { base }
    }

    fn base(&self) -> &CgroupController {
        &self.base
    }
}

impl MemoryController {
    /// Sets the hard limit in bytes, -1 for unlimited. A limit below
    /// current usage is reported with the usage that prevented it.
    pub fn set_limit(&self, limit: i64) -> Result<(), Status> {
        match self.base.try_set_param(CGROUP_MEMORY_LIMIT, limit) {
            Ok(()) => Ok(()),
            Err(err) => match err.inner().raw_os_error().map(Errno::from_i32) {
                Some(Errno::EBUSY) => {
                    let usage = self.get_usage()?;
                    let peak = self.get_max_usage()?;
                    Err(Status::internal(format!(
                        "unable to set memory limit to {limit} (current usage: {usage}, peak usage: {peak})"
                    )))
                }
                _ => Err(err.into()),
            },
        }
    }

    /// Sets the hard limit together with the memory+swap limit. The
    /// kernel insists that the swap limit stays above the memory limit,
    /// so the writes are ordered accordingly.
    pub fn set_limit_and_swap(&self, limit: i64, swap_limit: i64) -> Result<(), Status> {
        let current = self.get_limit()?;
        if swap_limit == -1 || current < swap_limit {
            self.set_swap_limit(swap_limit)?;
            self.set_limit(limit)?;
        } else {
            self.set_limit(limit)?;
            self.set_swap_limit(swap_limit)?;
        }

        Ok(())
    }

    pub fn set_swap_limit(&self, limit: i64) -> Result<(), Status> {
        self.base.set_param(CGROUP_MEMORY_SWAP_LIMIT, limit)
    }

    pub fn set_soft_limit(&self, limit: i64) -> Result<(), Status> {
        self.base.set_param(CGROUP_MEMORY_RESERVATION, limit)
    }

    pub fn set_swappiness(&self, swappiness: u64) -> Result<(), Status> {
        if swappiness > 100 {
            return Err(Status::invalid_argument(format!(
                "invalid swappiness value: {swappiness}. valid range is 0-100"
            )));
        }

        self.base.set_param(CGROUP_MEMORY_SWAPPINESS, swappiness)
    }

    pub fn set_oom_kill_disable(&self, disable: bool) -> Result<(), Status> {
        self.base
            .set_param(CGROUP_MEMORY_OOM_CONTROL, u8::from(disable))
    }

    pub fn get_limit(&self) -> Result<i64, Status> {
        self.base.read_limit(CGROUP_MEMORY_LIMIT)
    }

    pub fn get_soft_limit(&self) -> Result<i64, Status> {
        self.base.read_limit(CGROUP_MEMORY_RESERVATION)
    }

    pub fn get_swap_limit(&self) -> Result<i64, Status> {
        self.base.read_limit(CGROUP_MEMORY_SWAP_LIMIT)
    }

    pub fn get_usage(&self) -> Result<u64, Status> {
        self.base.read_value(CGROUP_MEMORY_USAGE)
    }

    pub fn get_max_usage(&self) -> Result<u64, Status> {
        self.base.read_value(CGROUP_MEMORY_MAX_USAGE)
    }

    pub fn get_fail_count(&self) -> Result<u64, Status> {
        self.base.read_value(CGROUP_MEMORY_FAILCNT)
    }

    pub fn get_swap_usage(&self) -> Result<u64, Status> {
        self.base.read_value(CGROUP_MEMORY_SWAP_USAGE)
    }

    pub fn get_swap_max_usage(&self) -> Result<u64, Status> {
        self.base.read_value(CGROUP_MEMORY_SWAP_MAX_USAGE)
    }

    pub fn get_swap_fail_count(&self) -> Result<u64, Status> {
        self.base.read_value(CGROUP_MEMORY_SWAP_FAILCNT)
    }

    pub fn get_swappiness(&self) -> Result<u64, Status> {
        self.base.read_value(CGROUP_MEMORY_SWAPPINESS)
    }

    pub fn get_oom_kill_disable(&self) -> Result<bool, Status> {
        let control = self.base.read_flat_keyed(CGROUP_MEMORY_OOM_CONTROL)?;
        Ok(control.get("oom_kill_disable").copied().unwrap_or(0) == 1)
    }

    pub fn get_stat(&self) -> Result<HashMap<String, u64>, Status> {
        self.base.read_flat_keyed(CGROUP_MEMORY_STAT)
    }

    /// Fires when a process in the cgroup is OOM-killed.
    pub fn register_oom(&self, callback: EventCallback) -> Result<NotificationId, Status> {
        self.base
            .register_notification(CGROUP_MEMORY_OOM_CONTROL, "", callback)
    }

    /// Fires when usage crosses the given number of bytes.
    pub fn register_usage_threshold(
        &self,
        usage: u64,
        callback: EventCallback,
    ) -> Result<NotificationId, Status> {
        self.base
            .register_notification(CGROUP_MEMORY_USAGE, &usage.to_string(), callback)
    }

}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::test::{set_fixture, test_cgroup_factory};

    fn memory_controller(tmp: &Path) -> MemoryController {
        let factory = test_cgroup_factory(&[(CgroupHierarchy::Memory, tmp)]);
        MemoryControllerFactory::new(factory)
            .create(Path::new("/job"))
            .expect("create memory cgroup")
    }

    #[test]
    fn test_set_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let memory = memory_controller(tmp.path());
        set_fixture(memory.base().path(), CGROUP_MEMORY_LIMIT, "0").unwrap();

        memory.set_limit(1024).expect("set memory limit");

        let content = fs::read_to_string(memory.base().path().join(CGROUP_MEMORY_LIMIT)).unwrap();
        assert_eq!(content, "1024");
    }

    #[test]
    fn test_set_limit_and_swap_orders_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let memory = memory_controller(tmp.path());
        set_fixture(memory.base().path(), CGROUP_MEMORY_LIMIT, "1024").unwrap();
        set_fixture(memory.base().path(), CGROUP_MEMORY_SWAP_LIMIT, "1024").unwrap();

        memory
            .set_limit_and_swap(512, 2048)
            .expect("set limit and swap");

        let limit = fs::read_to_string(memory.base().path().join(CGROUP_MEMORY_LIMIT)).unwrap();
        let swap = fs::read_to_string(memory.base().path().join(CGROUP_MEMORY_SWAP_LIMIT)).unwrap();
        assert_eq!(limit, "512");
        assert_eq!(swap, "2048");
    }

    #[test]
    fn test_set_swappiness_rejects_out_of_range() {
        let tmp = tempfile::tempdir().unwrap();
        let memory = memory_controller(tmp.path());
        set_fixture(memory.base().path(), CGROUP_MEMORY_SWAPPINESS, "60").unwrap();

        assert!(memory.set_swappiness(101).is_err());
        memory.set_swappiness(100).expect("set swappiness");
    }

    #[test]
    fn test_get_oom_kill_disable() {
        let tmp = tempfile::tempdir().unwrap();
        let memory = memory_controller(tmp.path());
        set_fixture(
            memory.base().path(),
            CGROUP_MEMORY_OOM_CONTROL,
            "oom_kill_disable 1\nunder_oom 0\n",
        )
        .unwrap();

        assert!(memory.get_oom_kill_disable().expect("read oom control"));
    }

    #[test]
    fn test_missing_swap_accounting_reads_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let memory = memory_controller(tmp.path());

        let status = memory.get_swap_usage().unwrap_err();
        assert!(status.is_not_found());
    }
}
