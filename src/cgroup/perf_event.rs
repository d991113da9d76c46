//! Typed access to the perf_event cgroup.
//!
//! The subsystem exports nothing to configure or read; owning a controller
//! keeps the container's perf cgroup alive so profiling tools can scope to
//! it.

use super::controller::CgroupController;
use super::factory::{ControllerFactory, TypedController};
use super::hierarchy::CgroupHierarchy;

pub type PerfControllerFactory = ControllerFactory<PerfController>;

#[derive(Debug)]
pub struct PerfController {
    base: CgroupController,
}

impl TypedController for PerfController {
    const HIERARCHY: CgroupHierarchy = CgroupHierarchy::PerfEvent;

    fn wrap(base: CgroupController) -> Self {
        PerfController { base }
    }

    fn base(&self) -> &CgroupController {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::test::test_cgroup_factory;

    #[test]
    fn test_create_makes_the_perf_cgroup() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = test_cgroup_factory(&[(CgroupHierarchy::PerfEvent, tmp.path())]);

        let perf = PerfControllerFactory::new(factory)
            .create(Path::new("/job"))
            .expect("create perf cgroup");

        assert!(perf.base().exists());
        assert_eq!(perf.base().hierarchy(), CgroupHierarchy::PerfEvent);
    }
}
