//! Typed access to the blkio cgroup.

use super::controller::CgroupController;
use super::factory::{ControllerFactory, TypedController};
use super::hierarchy::CgroupHierarchy;
use crate::spec::BlkioDeviceThrottle;
use crate::stats::{parse_device_number, BlkioDeviceStat};
use crate::status::Status;

// Proportional weight division policy
// ---------------------------------------
// Relative proportion of block I/O access available to the cgroup
// Format: weight (weight can range from 10 to 1000)
const BLKIO_WEIGHT: &str = "blkio.weight";
// Per-device override of blkio.weight
// Format: Major:Minor weight
const BLKIO_WEIGHT_DEVICE: &str = "blkio.weight_device";

// Throttling/upper limit policy
// ---------------------------------------
// Upper limit on read operations, in bytes per second
// Format: Major:Minor Bytes
pub(crate) const BLKIO_THROTTLE_READ_BPS: &str = "blkio.throttle.read_bps_device";
// Upper limit on write operations, in bytes per second
pub(crate) const BLKIO_THROTTLE_WRITE_BPS: &str = "blkio.throttle.write_bps_device";
// Upper limit on read operations, in operations per second
pub(crate) const BLKIO_THROTTLE_READ_IOPS: &str = "blkio.throttle.read_iops_device";
// Upper limit on write operations, in operations per second
pub(crate) const BLKIO_THROTTLE_WRITE_IOPS: &str = "blkio.throttle.write_iops_device";

// Statistics, recursive over child cgroups
// ---------------------------------------
// Number of bytes transferred to/from a device
// Format: Major:Minor Type Bytes
pub(crate) const BLKIO_IO_SERVICE_BYTES: &str = "blkio.io_service_bytes_recursive";
// Number of I/O operations performed on a device
pub(crate) const BLKIO_IO_SERVICED: &str = "blkio.io_serviced_recursive";
// Time in milliseconds the cgroup had access to a device
pub(crate) const BLKIO_TIME: &str = "blkio.time_recursive";
// Number of sectors transferred to/from a device
pub(crate) const BLKIO_SECTORS: &str = "blkio.sectors_recursive";
// Total time between request dispatch and request completion
pub(crate) const BLKIO_IO_SERVICE_TIME: &str = "blkio.io_service_time_recursive";
// Total time spent waiting in the scheduler queues for service
pub(crate) const BLKIO_WAIT_TIME: &str = "blkio.io_wait_time_recursive";
// Number of requests queued for I/O operations
pub(crate) const BLKIO_QUEUED: &str = "blkio.io_queued_recursive";
// Number of requests merged into requests for I/O operations
pub(crate) const BLKIO_MERGED: &str = "blkio.io_merged_recursive";

pub type BlkioControllerFactory = ControllerFactory<BlkioController>;

#[derive(Debug)]
pub struct BlkioController {
    base: CgroupController,
}

impl TypedController for BlkioController {
    const HIERARCHY: CgroupHierarchy = CgroupHierarchy::Blkio;

    fn wrap(base: CgroupController) -> Self {
        BlkioController { base }
    }

    fn base(&self) -> &CgroupController {
        &self.base
    }
}

impl BlkioController {
    pub fn set_weight(&self, weight: u64) -> Result<(), Status> {
        self.base.set_param(BLKIO_WEIGHT, weight)
    }

    pub fn set_device_weight(&self, major: u64, minor: u64, weight: u64) -> Result<(), Status> {
        self.base
            .set_param_str(BLKIO_WEIGHT_DEVICE, &format!("{major}:{minor} {weight}"))
    }

    pub fn set_throttle(&self, file: &str, throttle: &BlkioDeviceThrottle) -> Result<(), Status> {
        self.base.set_param_str(
            file,
            &format!("{}:{} {}", throttle.major, throttle.minor, throttle.rate),
        )
    }

    pub fn get_weight(&self) -> Result<u64, Status> {
        self.base.read_value(BLKIO_WEIGHT)
    }

    /// Reads one throttle file back into device throttles.
    pub fn get_throttles(&self, file: &str) -> Result<Vec<BlkioDeviceThrottle>, Status> {
        let content = self.base.read_param(file)?;
        let path = self.base.path().join(file);

        let mut throttles = Vec::new();
        for line in content.lines() {
            let parts: Vec<&str> = line.split_ascii_whitespace().collect();
            let &[device, rate] = parts.as_slice() else {
                continue;
            };

            let (major, minor) = parse_device_number(device)?;
            throttles.push(BlkioDeviceThrottle {
                major,
                minor,
                rate: rate.parse().map_err(|err| {
                    Status::internal(format!(
                        "failed to parse throttle rate {rate} in {}: {err}",
                        path.display()
                    ))
                })?,
            });
        }

        Ok(throttles)
    }

    /// Reads one per-device statistics file. Lines either carry an
    /// operation type (`Major:Minor Type Value`) or not
    /// (`Major:Minor Value`); the kernel's `Total` summary line is skipped.
    pub fn get_device_stats(&self, file: &str) -> Result<Vec<BlkioDeviceStat>, Status> {
        let content = self.base.read_param(file)?;
        let path = self.base.path().join(file);

        let mut stats = Vec::new();
        for line in content.lines() {
            let parts: Vec<&str> = line.split_ascii_whitespace().collect();
            let (device, op_type, value) = match parts.as_slice() {
                ["Total", ..] => continue,
                [device, value] => (device, None, value),
                [device, op_type, value] => (device, Some(op_type.to_string()), value),
                _ => continue,
            };

            let (major, minor) = parse_device_number(device)?;
            stats.push(BlkioDeviceStat {
                major,
                minor,
                op_type,
                value: value.parse().map_err(|err| {
                    Status::internal(format!(
                        "failed to parse device stat {value} in {}: {err}",
                        path.display()
                    ))
                })?,
            });
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::test::{set_fixture, test_cgroup_factory};

    fn blkio_controller(tmp: &Path) -> BlkioController {
        let factory = test_cgroup_factory(&[(CgroupHierarchy::Blkio, tmp)]);
        BlkioControllerFactory::new(factory)
            .create(Path::new("/job"))
            .expect("create blkio cgroup")
    }

    #[test]
    fn test_set_weight() {
        let tmp = tempfile::tempdir().unwrap();
        let blkio = blkio_controller(tmp.path());
        set_fixture(blkio.base().path(), BLKIO_WEIGHT, "").unwrap();

        blkio.set_weight(250).expect("set weight");

        let content = fs::read_to_string(blkio.base().path().join(BLKIO_WEIGHT)).unwrap();
        assert_eq!(content, "250");
    }

    #[test]
    fn test_set_throttle_formats_device_line() {
        let tmp = tempfile::tempdir().unwrap();
        let blkio = blkio_controller(tmp.path());
        set_fixture(blkio.base().path(), BLKIO_THROTTLE_READ_BPS, "").unwrap();

        let throttle = BlkioDeviceThrottle {
            major: 8,
            minor: 0,
            rate: 102400,
        };
        blkio
            .set_throttle(BLKIO_THROTTLE_READ_BPS, &throttle)
            .expect("set throttle");

        let content =
            fs::read_to_string(blkio.base().path().join(BLKIO_THROTTLE_READ_BPS)).unwrap();
        assert_eq!(content, "8:0 102400");
    }

    #[test]
    fn test_get_throttles_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let blkio = blkio_controller(tmp.path());
        set_fixture(
            blkio.base().path(),
            BLKIO_THROTTLE_WRITE_IOPS,
            "8:0 120\n8:16 42\n",
        )
        .unwrap();

        let throttles = blkio
            .get_throttles(BLKIO_THROTTLE_WRITE_IOPS)
            .expect("read throttles");
        assert_eq!(
            throttles,
            vec![
                BlkioDeviceThrottle {
                    major: 8,
                    minor: 0,
                    rate: 120
                },
                BlkioDeviceThrottle {
                    major: 8,
                    minor: 16,
                    rate: 42
                },
            ]
        );
    }

    #[test]
    fn test_get_device_stats_with_op_types() {
        let tmp = tempfile::tempdir().unwrap();
        let blkio = blkio_controller(tmp.path());
        let content = ["8:0 Read 20", "8:0 Write 40", "Total 60"].join("\n");
        set_fixture(blkio.base().path(), BLKIO_IO_SERVICE_BYTES, &content).unwrap();

        let stats = blkio
            .get_device_stats(BLKIO_IO_SERVICE_BYTES)
            .expect("read device stats");
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].op_type.as_deref(), Some("Read"));
        assert_eq!(stats[1].value, 40);
    }

    #[test]
    fn test_get_device_stats_without_op_types() {
        let tmp = tempfile::tempdir().unwrap();
        let blkio = blkio_controller(tmp.path());
        set_fixture(blkio.base().path(), BLKIO_SECTORS, "8:0 1024\n").unwrap();

        let stats = blkio.get_device_stats(BLKIO_SECTORS).expect("read sectors");
        assert_eq!(
            stats,
            vec![BlkioDeviceStat {
                major: 8,
                minor: 0,
                op_type: None,
                value: 1024
            }]
        );
    }
}
