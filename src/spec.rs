//! Container specification and event messages.
//!
//! These mirror the wire messages exchanged with the container manager:
//! plain structs with every scalar field optional and repeated fields as
//! vectors. An unset field means "not specified" and is what
//! [`UpdatePolicy::Diff`] keys on.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How [`ResourceHandler::update`](crate::resources::ResourceHandler::update)
/// treats fields that the spec leaves unset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Set every relevant limit, resetting unspecified fields to defaults.
    Replace,
    /// Apply only the fields explicitly set, leaving the rest untouched.
    Diff,
}

/// Selects how much of the exported statistics a stats call reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatsType {
    /// Only cheaply readable counters.
    Summary,
    /// Every exported statistic.
    Full,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub cpu: Option<CpuSpec>,
    pub memory: Option<MemorySpec>,
    pub cpuset: Option<CpusetSpec>,
    pub blkio: Option<BlkioSpec>,
    pub devices: Option<DeviceSpec>,
}

/// Where a container is placed in the cpu scheduling hierarchy. Batch
/// containers are folded into a shared best-effort cgroup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulingClass {
    #[default]
    Normal,
    Batch,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuSpec {
    pub scheduling_class: Option<SchedulingClass>,
    /// Relative weight of the container, in `cpu.shares` units.
    pub shares: Option<u64>,
    /// CFS bandwidth quota in microseconds per period; -1 disables it.
    pub quota_us: Option<i64>,
    /// CFS bandwidth period in microseconds.
    pub period_us: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySpec {
    /// Hard limit in bytes; -1 means unlimited.
    pub limit: Option<i64>,
    /// Soft limit (reservation) in bytes; -1 means unlimited.
    pub reservation: Option<i64>,
    /// Combined memory+swap limit in bytes; -1 means unlimited.
    pub swap_limit: Option<i64>,
    /// Kernel swappiness for this container, 0-100.
    pub swappiness: Option<u64>,
    /// Leave processes alive when the limit is hit instead of OOM-killing.
    pub oom_kill_disable: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CpusetSpec {
    /// Cpu mask in kernel list format, e.g. `0-3,7`.
    pub cpus: Option<String>,
    /// Memory node mask in kernel list format.
    pub mems: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlkioSpec {
    /// Proportional weight, 10-1000.
    pub weight: Option<u64>,
    pub device_weights: Vec<BlkioDeviceWeight>,
    pub throttle_read_bps: Vec<BlkioDeviceThrottle>,
    pub throttle_write_bps: Vec<BlkioDeviceThrottle>,
    pub throttle_read_iops: Vec<BlkioDeviceThrottle>,
    pub throttle_write_iops: Vec<BlkioDeviceThrottle>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlkioDeviceWeight {
    pub major: u64,
    pub minor: u64,
    pub weight: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlkioDeviceThrottle {
    pub major: u64,
    pub minor: u64,
    /// Bytes or operations per second, depending on the throttle file.
    pub rate: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub rules: Vec<DeviceRule>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Char,
    Block,
    #[default]
    All,
}

impl Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match self {
            DeviceType::Char => "c",
            DeviceType::Block => "b",
            DeviceType::All => "a",
        };

        write!(f, "{print}")
    }
}

impl FromStr for DeviceType {
    type Err = ParseDeviceRuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "c" => Ok(DeviceType::Char),
            "b" => Ok(DeviceType::Block),
            "a" => Ok(DeviceType::All),
            other => Err(ParseDeviceRuleError::BadType {
                found: other.to_string(),
            }),
        }
    }
}

/// One entry of the device whitelist, in `devices.allow` line syntax:
/// `<type> <major>:<minor> <access>` with `*` for wildcard numbers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRule {
    pub allow: bool,
    pub dev_type: DeviceType,
    /// Unset means every major number.
    pub major: Option<i64>,
    /// Unset means every minor number.
    pub minor: Option<i64>,
    /// Any combination of `r`, `w` and `m`.
    pub access: String,
}

impl Display for DeviceRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let major = self
            .major
            .map(|m| m.to_string())
            .unwrap_or_else(|| "*".to_string());
        let minor = self
            .minor
            .map(|m| m.to_string())
            .unwrap_or_else(|| "*".to_string());

        write!(f, "{} {}:{} {}", self.dev_type, major, minor, self.access)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ParseDeviceRuleError {
    #[error("device rule does not conform to '<type> <major>:<minor> <access>': {line}")]
    DoesNotConform { line: String },
    #[error("unknown device type {found}")]
    BadType { found: String },
    #[error("bad device number {found}")]
    BadNumber { found: String },
}

impl DeviceRule {
    /// Parses a `devices.list` line. The kernel only lists allowed rules,
    /// so the result always has `allow` set.
    pub fn parse_listed(line: &str) -> Result<Self, ParseDeviceRuleError> {
        let parts: Vec<&str> = line.split_ascii_whitespace().collect();
        let &[dev_type, numbers, access] = parts.as_slice() else {
            return Err(ParseDeviceRuleError::DoesNotConform {
                line: line.to_string(),
            });
        };

        let (major, minor) = numbers
            .split_once(':')
            .ok_or_else(|| ParseDeviceRuleError::DoesNotConform {
                line: line.to_string(),
            })?;

        let parse_number = |num: &str| -> Result<Option<i64>, ParseDeviceRuleError> {
            if num == "*" {
                return Ok(None);
            }
            num.parse()
                .map(Some)
                .map_err(|_| ParseDeviceRuleError::BadNumber {
                    found: num.to_string(),
                })
        };

        Ok(DeviceRule {
            allow: true,
            dev_type: dev_type.parse()?,
            major: parse_number(major)?,
            minor: parse_number(minor)?,
            access: access.to_string(),
        })
    }
}

/// Condition a notification can be registered for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSpec {
    /// A process in the container was OOM-killed.
    Oom,
    /// Memory usage crossed the given number of bytes.
    MemoryThreshold { usage: u64 },
}

/// One-shot machine-wide setup parameters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InitSpec {}
