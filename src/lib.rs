//! snap-confine: setuid launcher that places a snap application into its
//! confinement and executes it.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::namespace`]: mount namespace entry, preservation and the helper process
//! - [`kernel::mount`]: mountinfo parsing, bootstrap of the snap root, fixups
//! - [`kernel::cgroup`]: freezer membership and the devices cgroup
//! - [`kernel::credentials`]: identity snapshots and the ordered privilege drop
//! - [`kernel::lock`]: global and per-snap flock serialization
//! - [`kernel::seccomp`]: loading precompiled syscall filters
//!
//! ## Execution Control ([`exec`])
//! - [`exec::launch`](mod@exec::launch): the mount namespace sequence behind a host seam
//! - [`exec::launcher`]: one launch from entry to `execve`
//! - [`exec::delegate`]: `snap-update-ns` and `snap-discard-ns`
//!
//! ## Security Policy ([`policy`])
//! - [`policy::apparmor`]: confinement check and exec-time profile change
//! - [`policy::cookie`]: snap context cookie
//! - [`policy::selinux`]: `/run/snapd` relabelling and the exec-time domain change
//! - [`policy::user_data`]: `SNAP_USER_DATA` creation
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: invocation model and the error type
//! - [`config::settings`]: well-known host paths
//! - [`config::strategy`]: distribution and mount mode resolution
//!
//! # Design Principles
//!
//! 1. **Kernel as truth**: namespace identity from nsfs, membership from cgroup files
//! 2. **Types prevent errors**: exec is only reachable after the verified drop
//! 3. **Minimal unsafe**: thin wrappers with explicit preconditions

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Security Policy
pub mod policy;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// CLI entrypoint wiring for the snap-confine binary.
pub mod cli;

pub use config::types::*;
