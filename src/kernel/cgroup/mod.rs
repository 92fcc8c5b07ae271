//! Control groups the launcher puts the application into.
//!
//! The freezer group tracks every process of a snap so a stale preserved
//! namespace is only discarded while nothing uses it. The devices group
//! restricts device node access for snaps with udev-tagged devices.

pub mod backend;
pub mod devices;
pub mod freezer;

pub use backend::{detect_cgroup_backend, CgroupBackendType};
pub use devices::DeviceCgroup;
pub use freezer::FreezerGroup;
