#![cfg(test)]

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cgroup::{CgroupFactory, CgroupHierarchy};
use crate::events::EventFdNotifications;
use crate::kernel::KernelApi;

pub fn set_fixture(temp_dir: &Path, filename: &str, val: &str) -> Result<PathBuf> {
    let full_path = temp_dir.join(filename);

    std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&full_path)
        .with_context(|| format!("failed to open {full_path:?}"))?
        .write_all(val.as_bytes())
        .with_context(|| format!("failed to write to {full_path:?}"))?;

    Ok(full_path)
}

/// Builds a cgroup factory whose hierarchies are mounted on temp
/// directories, all owned by this process.
pub fn test_cgroup_factory(mounts: &[(CgroupHierarchy, &Path)]) -> Arc<CgroupFactory> {
    let kernel = Arc::new(KernelApi::new());
    let notifications = Arc::new(EventFdNotifications::new(Arc::clone(&kernel)));

    let mount_points: HashMap<CgroupHierarchy, PathBuf> = mounts
        .iter()
        .map(|(hierarchy, path)| (*hierarchy, path.to_path_buf()))
        .collect();
    let owned: HashSet<CgroupHierarchy> = mount_points.keys().copied().collect();

    Arc::new(CgroupFactory::with_mount_points(
        mount_points,
        owned,
        kernel,
        notifications,
    ))
}
