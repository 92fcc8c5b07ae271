//! Mount namespace construction
//!
//! Propagation fixups on the host, bootstrap of a fresh namespace and the
//! mountinfo parser both rely on.

pub mod bootstrap;
pub mod fixups;
pub mod mountinfo;
pub mod ops;
pub mod propagation;

pub use mountinfo::{parse_mountinfo, read_mountinfo, MountInfoEntry};
pub use ops::MountOp;
