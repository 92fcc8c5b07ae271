//! Execution control
//!
//! Orchestrates kernel primitives into one confined launch, with the mount
//! namespace sequence behind a seam and the final exec gated on the
//! privilege drop.

pub mod delegate;
pub mod host;
pub mod launch;
pub mod launcher;

pub use launch::{prepare_mount_namespace, MountNamespaceHost};
pub use launcher::{launch, launch_request};
