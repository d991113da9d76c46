//! Typed access to the cpuacct cgroup. Accounting only, nothing to set.

use super::controller::CgroupController;
use super::factory::{ControllerFactory, TypedController};
use super::hierarchy::CgroupHierarchy;
use crate::stats::CpuUsage;
use crate::status::Status;

// Contains user mode and kernel mode cpu consumption
const CGROUP_CPUACCT_STAT: &str = "cpuacct.stat";
// Contains overall cpu consumption
const CGROUP_CPUACCT_USAGE: &str = "cpuacct.usage";
// Contains overall cpu consumption differentiated by core
const CGROUP_CPUACCT_PERCPU: &str = "cpuacct.usage_percpu";

pub type CpuAcctControllerFactory = ControllerFactory<CpuAcctController>;

#[derive(Debug)]
pub struct CpuAcctController {
    base: CgroupController,
}

impl TypedController for CpuAcctController {
    const HIERARCHY: CgroupHierarchy = CgroupHierarchy::CpuAcct;

    fn wrap(base: CgroupController) -> Self {
        CpuAcctController { base }
    }

    fn base(&self) -> &CgroupController {
        &self.base
    }
}

impl CpuAcctController {
    /// Total, user-mode and kernel-mode consumption. Per-core figures are
    /// collected separately via [`CpuAcctController::get_per_core_usage`].
    pub fn get_usage(&self) -> Result<CpuUsage, Status> {
        let stat_table = self.base.read_flat_keyed(CGROUP_CPUACCT_STAT)?;
        let stat_path = self.base.path().join(CGROUP_CPUACCT_STAT);

        let mut stats = CpuUsage::default();
        macro_rules! get {
            ($name: expr => $field: ident) => {
                stats.$field = *stat_table.get($name).ok_or_else(|| {
                    Status::internal(format!(
                        "missing field {} from {}",
                        $name,
                        stat_path.display()
                    ))
                })?;
            };
        }

        get!("user" => user);
        get!("system" => kernel);

        stats.total = self.base.read_value(CGROUP_CPUACCT_USAGE)?;
        Ok(stats)
    }

    pub fn get_per_core_usage(&self) -> Result<Vec<u64>, Status> {
        let content = self.base.read_param(CGROUP_CPUACCT_PERCPU)?;
        let path = self.base.path().join(CGROUP_CPUACCT_PERCPU);

        content
            .split_ascii_whitespace()
            .map(|value| {
                value.parse().map_err(|err| {
                    Status::internal(format!(
                        "failed to parse per core cpu usage {value} in {}: {err}",
                        path.display()
                    ))
                })
            })
            .collect()
    }
}
