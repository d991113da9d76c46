//! Cgroup hierarchy discovery and per-subsystem controllers.

pub mod blkio;
pub mod controller;
pub mod cpu;
pub mod cpuacct;
pub mod cpuset;
pub mod devices;
pub mod factory;
pub mod hierarchy;
pub mod memory;
pub mod perf_event;

pub use controller::CgroupController;
pub use factory::{CgroupFactory, ControllerFactory, TypedController};
pub use hierarchy::{CgroupHierarchy, HIERARCHIES};
