//! Container resource management over Linux control groups.
//!
//! A container manager obtains one [`resources::ResourceHandlerFactory`]
//! per resource type (memory, cpu, cpuset, blkio, devices, monitoring).
//! The factory translates logical container names into cgroup hierarchy
//! paths and hands out [`resources::ResourceHandler`]s, each owning the
//! controllers for the hierarchies that back the container. Handlers expose
//! a uniform surface for updating limits, collecting statistics, reading
//! back the effective configuration, moving threads and registering
//! eventfd notifications.
#[cfg(test)]
#[macro_use]
extern crate quickcheck;

mod test;

pub mod cgroup;
pub mod common;
pub mod events;
pub mod kernel;
pub mod resources;
pub mod spec;
pub mod stats;
pub mod status;
