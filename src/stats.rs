//! Container statistics messages and cgroup stat-file parsing.

use std::collections::HashMap;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::{self, WrapIoResult, WrappedIoError};
use crate::status::Status;

/// Records the value of one statistic if it could be read, skips it if the
/// kernel does not export it, and aborts on any other error. Every stats
/// and spec read-back assembly goes through this.
pub(crate) fn set_if_present<T>(
    result: Result<T, Status>,
    slot: &mut Option<T>,
) -> Result<(), Status> {
    match result {
        Ok(value) => {
            *slot = Some(value);
            Ok(())
        }
        Err(status) if status.is_not_found() => Ok(()),
        Err(status) => Err(status),
    }
}

/// Statistics for one container, as collected from its controllers. A
/// field left unset was either out of scope for the requested
/// [`StatsType`](crate::spec::StatsType) or not exported by this kernel.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub cpu: Option<CpuStats>,
    pub memory: Option<MemoryStats>,
    pub blkio: Option<BlkioStats>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuStats {
    pub usage: Option<CpuUsage>,
    pub throttling: Option<CpuThrottling>,
}

/// Cpu time consumed by the container. The total is in nanoseconds; user
/// and kernel mode splits are in USER_HZ ticks, as the kernel reports them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuUsage {
    pub total: u64,
    pub user: u64,
    pub kernel: u64,
    /// Per-core total consumption, only collected for full stats.
    pub per_core: Vec<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuThrottling {
    /// Number of elapsed enforcement intervals.
    pub periods: u64,
    /// Number of intervals in which the container exhausted its quota.
    pub throttled_periods: u64,
    /// Total time the container spent throttled, in nanoseconds.
    pub throttled_time: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Current usage in bytes.
    pub usage: Option<u64>,
    /// Maximum recorded usage in bytes.
    pub max_usage: Option<u64>,
    /// Number of times usage hit the limit.
    pub fail_count: Option<u64>,
    /// Effective hard limit in bytes; -1 means unlimited.
    pub limit: Option<i64>,
    /// Combined memory+swap usage in bytes.
    pub swap_usage: Option<u64>,
    /// Maximum recorded memory+swap usage in bytes.
    pub swap_max_usage: Option<u64>,
    /// Number of times memory+swap usage hit the limit.
    pub swap_fail_count: Option<u64>,
    /// Effective memory+swap limit in bytes; -1 means unlimited.
    pub swap_limit: Option<i64>,
    /// Page cache in bytes.
    pub cache: Option<u64>,
    /// Raw counters from the kernel's memory stat file.
    pub stat: Option<HashMap<String, u64>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlkioStats {
    /// Bytes transferred to/from each device.
    pub service_bytes: Option<Vec<BlkioDeviceStat>>,
    /// I/O operations performed on each device.
    pub serviced: Option<Vec<BlkioDeviceStat>>,
    /// Time with access to each device, in milliseconds.
    pub time: Option<Vec<BlkioDeviceStat>>,
    /// Sectors transferred to/from each device.
    pub sectors: Option<Vec<BlkioDeviceStat>>,
    /// Time between request dispatch and completion, in nanoseconds.
    pub service_time: Option<Vec<BlkioDeviceStat>>,
    /// Time spent waiting in the scheduler queues, in nanoseconds.
    pub wait_time: Option<Vec<BlkioDeviceStat>>,
    /// Requests queued for I/O.
    pub queued: Option<Vec<BlkioDeviceStat>>,
    /// Requests merged into other requests.
    pub merged: Option<Vec<BlkioDeviceStat>>,
}

/// One statistic value for a specific device.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlkioDeviceStat {
    pub major: u64,
    pub minor: u64,
    /// Operation type (`Read`, `Write`, …) for files that split by it.
    pub op_type: Option<String>,
    pub value: u64,
}

/// Parses a single valued file to an u64. The kernel's `max` sentinel is
/// mapped to `u64::MAX`.
pub(crate) fn parse_single_value(file_path: &Path) -> Result<u64, WrappedIoError> {
    let value = common::read_cgroup_file(file_path)?;
    let value = value.trim();
    if value == "max" {
        return Ok(u64::MAX);
    }

    value
        .parse()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
        .wrap_other(file_path)
}

#[derive(thiserror::Error, Debug)]
pub enum ParseFlatKeyedDataError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("flat keyed data at {path} contains entries that do not conform to 'key value'")]
    DoesNotConform { path: PathBuf },
    #[error("failed to parse value {value} from {path}")]
    FailedToParse {
        value: String,
        path: PathBuf,
        err: ParseIntError,
    },
}

/// Parses a file that is structured according to the flat keyed format.
pub(crate) fn parse_flat_keyed_data(
    file_path: &Path,
) -> Result<HashMap<String, u64>, ParseFlatKeyedDataError> {
    let mut stats = HashMap::new();
    let keyed_data = common::read_cgroup_file(file_path)?;
    for entry in keyed_data.lines() {
        let entry_fields: Vec<&str> = entry.split_ascii_whitespace().collect();
        if entry_fields.len() != 2 {
            return Err(ParseFlatKeyedDataError::DoesNotConform {
                path: file_path.to_path_buf(),
            });
        }

        stats.insert(
            entry_fields[0].to_owned(),
            entry_fields[1]
                .parse()
                .map_err(|err| ParseFlatKeyedDataError::FailedToParse {
                    value: entry_fields[0].into(),
                    path: file_path.to_path_buf(),
                    err,
                })?,
        );
    }

    Ok(stats)
}

#[derive(thiserror::Error, Debug)]
pub enum ParseDeviceNumberError {
    #[error("failed to parse device number from {device}: expected 2 parts, found {numbers}")]
    TooManyNumbers { device: String, numbers: usize },
    #[error("failed to parse device number from {device}: {err}")]
    MalformedNumber { device: String, err: ParseIntError },
}

pub(crate) fn parse_device_number(device: &str) -> Result<(u64, u64), ParseDeviceNumberError> {
    let numbers: Vec<&str> = device.split_terminator(':').collect();
    if numbers.len() != 2 {
        return Err(ParseDeviceNumberError::TooManyNumbers {
            device: device.into(),
            numbers: numbers.len(),
        });
    }

    Ok((
        numbers[0]
            .parse()
            .map_err(|err| ParseDeviceNumberError::MalformedNumber {
                device: device.into(),
                err,
            })?,
        numbers[1]
            .parse()
            .map_err(|err| ParseDeviceNumberError::MalformedNumber {
                device: device.into(),
                err,
            })?,
    ))
}
