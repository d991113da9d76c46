//! Typed access to the cpu cgroup.

use super::controller::CgroupController;
use super::factory::{ControllerFactory, TypedController};
use super::hierarchy::CgroupHierarchy;
use crate::stats::CpuThrottling;
use crate::status::Status;

const CGROUP_CPU_SHARES: &str = "cpu.shares";
const CGROUP_CPU_QUOTA: &str = "cpu.cfs_quota_us";
const CGROUP_CPU_PERIOD: &str = "cpu.cfs_period_us";
const CGROUP_CPU_STAT: &str = "cpu.stat";

pub type CpuControllerFactory = ControllerFactory<CpuController>;

#[derive(Debug)]
pub struct CpuController {
    base: CgroupController,
}

impl TypedController for CpuController {
    const HIERARCHY: CgroupHierarchy = CgroupHierarchy::Cpu;

    fn wrap(base: CgroupController) -> Self {
        CpuController { base }
    }

    fn base(&self) -> &CgroupController {
        &self.base
    }
}

impl CpuController {
    pub fn set_shares(&self, shares: u64) -> Result<(), Status> {
        self.base.set_param(CGROUP_CPU_SHARES, shares)
    }

    /// Sets the CFS bandwidth quota in microseconds, -1 to disable.
    pub fn set_quota(&self, quota_us: i64) -> Result<(), Status> {
        self.base.set_param(CGROUP_CPU_QUOTA, quota_us)
    }

    pub fn set_period(&self, period_us: u64) -> Result<(), Status> {
        self.base.set_param(CGROUP_CPU_PERIOD, period_us)
    }

    pub fn get_shares(&self) -> Result<u64, Status> {
        self.base.read_value(CGROUP_CPU_SHARES)
    }

    pub fn get_quota(&self) -> Result<i64, Status> {
        let value = self.base.read_param(CGROUP_CPU_QUOTA)?;
        value.trim().parse().map_err(|err| {
            Status::internal(format!("failed to parse cpu quota {}: {err}", value.trim()))
        })
    }

    pub fn get_period(&self) -> Result<u64, Status> {
        self.base.read_value(CGROUP_CPU_PERIOD)
    }

    pub fn get_throttling(&self) -> Result<CpuThrottling, Status> {
        let stat_table = self.base.read_flat_keyed(CGROUP_CPU_STAT)?;
        let stat_path = self.base.path().join(CGROUP_CPU_STAT);

        let mut stats = CpuThrottling::default();
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

        get!("nr_periods" => periods);
        get!("nr_throttled" => throttled_periods);
        get!("throttled_time" => throttled_time);

        Ok(stats)
    }
}
