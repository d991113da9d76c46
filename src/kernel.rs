//! Thin wrapper over the kernel interfaces the controllers touch.
//!
//! Factories and handlers share one [`KernelApi`] by reference and never
//! own it; all durable state lives in the cgroup filesystem behind it.

use std::fs;
use std::io;
use std::os::fd::OwnedFd;
use std::path::Path;
use std::time::Duration;

use nix::sys::eventfd::{eventfd, EfdFlags};

use crate::common::{self, WrapIoResult, WrappedIoError};

#[derive(Debug, Default)]
pub struct KernelApi {}

impl KernelApi {
    pub fn new() -> Self {
        KernelApi {}
    }

    pub fn read_file(&self, path: &Path) -> Result<String, WrappedIoError> {
        common::read_cgroup_file(path)
    }

    pub fn write_file<T: ToString>(&self, path: &Path, data: T) -> Result<(), WrappedIoError> {
        common::write_cgroup_file(path, data)
    }

    pub fn write_file_str(&self, path: &Path, data: &str) -> Result<(), WrappedIoError> {
        common::write_cgroup_file_str(path, data)
    }

    pub fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    pub fn create_dir(&self, path: &Path) -> Result<(), WrappedIoError> {
        fs::create_dir_all(path).wrap_create_dir(path)
    }

    /// Removes a cgroup directory, retrying while the kernel still
    /// considers it busy.
    pub fn remove_dir(&self, path: &Path) -> Result<(), WrappedIoError> {
        common::delete_with_retry(path, 4, Duration::from_millis(100))
    }

    pub fn eventfd(&self) -> io::Result<OwnedFd> {
        eventfd(0, EfdFlags::EFD_CLOEXEC).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::set_fixture;

    #[test]
    fn test_write_requires_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let kernel = KernelApi::new();

        let missing = tmp.path().join("memory.limit_in_bytes");
        assert!(kernel.write_file(&missing, 4096).is_err());

        set_fixture(tmp.path(), "memory.limit_in_bytes", "0").unwrap();
        kernel.write_file(&missing, 4096).expect("write limit");
        assert_eq!(kernel.read_file(&missing).unwrap(), "4096");
    }

    #[test]
    fn test_remove_dir_deletes_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let kernel = KernelApi::new();

        let dir = tmp.path().join("job");
        kernel.create_dir(&dir).expect("create cgroup dir");
        assert!(kernel.file_exists(&dir));

        kernel.remove_dir(&dir).expect("remove cgroup dir");
        assert!(!kernel.file_exists(&dir));
    }

    #[test]
    fn test_eventfd_is_readable_after_arming() {
        use std::fs::File;
        use std::io::{Read, Write};

        let kernel = KernelApi::new();
        let efd = kernel.eventfd().expect("create eventfd");
        let file = File::from(efd);

        (&file).write_all(&1u64.to_ne_bytes()).expect("arm eventfd");
        let mut buf = [0u8; 8];
        (&file).read_exact(&mut buf).expect("read eventfd");
        assert_eq!(u64::from_ne_bytes(buf), 1);
    }
}
