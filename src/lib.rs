//! Control-group resource confinement for virtual machine domains.
//!
//! A virtualization host daemon resolves one cgroup per hypervisor driver
//! and one nested cgroup per domain. The resulting [`CgroupHandle`] is used
//! to place the domain's processes, cap its memory, whitelist its devices,
//! weight its CPU scheduling and read its CPU time accounting.
#[cfg(test)]
#[macro_use]
extern crate quickcheck;


pub mod cgroup;
pub mod common;
pub mod controller_type;
pub mod cpu;
pub mod cpuacct;
pub mod devices;
pub mod memory;
pub mod mounts;

pub use cgroup::{CgroupError, CgroupHandle};
pub use controller_type::ControllerType;
pub use devices::DeviceType;
pub use mounts::{MountPoint, Mounts};
