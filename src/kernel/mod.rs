//! Thin wrappers around Linux kernel primitives.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments.
//! Dependency direction: process -> lock -> credentials -> mount -> namespace -> cgroup

pub mod cgroup;
pub mod credentials;
pub mod lock;
pub mod mount;
pub mod namespace;
pub mod process;
pub mod seccomp;
