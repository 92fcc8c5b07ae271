//! One-time propagation fixups on the host, done under the global lock.
//!
//! Preserved namespaces are slaves of the host, so the snap mount directory
//! must be part of a shared peer group for new snap mounts to reach them. The
//! namespace directory must be private or the bind-mounted namespace files
//! would propagate into every other namespace and pin them forever.

use super::mountinfo::{read_mountinfo, MountInfoEntry};
use super::ops::MountOp;
use crate::config::settings::ConfineConfig;
use crate::config::types::{ConfineError, Result};
use nix::mount::MsFlags;
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

/// The visible (last) mount at `dir`, if any.
pub fn find_mount<'a>(entries: &'a [MountInfoEntry], dir: &Path) -> Option<&'a MountInfoEntry> {
    entries
        .iter()
        .rev()
        .find(|e| Path::new(&e.mount_dir) == dir)
}

pub fn is_mounted_shared(entries: &[MountInfoEntry], dir: &Path) -> bool {
    find_mount(entries, dir).is_some_and(MountInfoEntry::is_shared)
}

/// Operations needed to give the snap mount directory shared propagation.
pub fn plan_shared_snap_mount(entries: &[MountInfoEntry], snap_mount_dir: &Path) -> Vec<MountOp> {
    if is_mounted_shared(entries, Path::new("/")) || is_mounted_shared(entries, snap_mount_dir) {
        return Vec::new();
    }
    vec![
        MountOp::bind(snap_mount_dir, snap_mount_dir, true),
        MountOp::propagation(snap_mount_dir, MsFlags::MS_SHARED | MsFlags::MS_REC),
    ]
}

pub fn ensure_shared_snap_mount(config: &ConfineConfig) -> Result<()> {
    let entries = read_mountinfo(&config.proc_path("self/mountinfo"))?;
    let plan = plan_shared_snap_mount(&entries, &config.snap_mount_dir);
    if plan.is_empty() {
        log::debug!("snap mount directory already has shared propagation");
        return Ok(());
    }
    std::fs::create_dir_all(&config.snap_mount_dir)?;
    for op in &plan {
        op.apply()?;
    }
    Ok(())
}

/// Operations needed to make the namespace directory a private mount point.
pub fn plan_private_ns_dir(entries: &[MountInfoEntry], ns_dir: &Path) -> Vec<MountOp> {
    match find_mount(entries, ns_dir) {
        Some(entry) if entry.is_private() => Vec::new(),
        Some(_) => vec![MountOp::propagation(ns_dir, MsFlags::MS_PRIVATE)],
        None => vec![
            MountOp::bind(ns_dir, ns_dir, false),
            MountOp::propagation(ns_dir, MsFlags::MS_PRIVATE),
        ],
    }
}

/// Create the namespace directory and make it a private mount point.
pub fn initialize_ns_dir(config: &ConfineConfig) -> Result<()> {
    let ns_dir = &config.ns_dir;
    DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(ns_dir)
        .map_err(|e| {
            ConfineError::Namespace(format!(
                "cannot create namespace directory {}: {}",
                ns_dir.display(),
                e
            ))
        })?;

    let entries = read_mountinfo(&config.proc_path("self/mountinfo"))?;
    for op in plan_private_ns_dir(&entries, ns_dir) {
        op.apply()?;
    }
    Ok(())
}
