//! Staleness inspection of a preserved per-snap namespace.
//!
//! A preserved namespace is stale when its root filesystem is no longer the
//! current revision of the base snap, i.e. the base was refreshed since the
//! namespace was built.

use crate::config::settings::ConfineConfig;
use crate::config::types::{ConfineError, Result};
use crate::kernel::mount::mountinfo::{parse_mountinfo, read_mountinfo, MountInfoEntry};
use crate::kernel::namespace::enter_mount_ns;
use crate::kernel::process;
use nix::sys::signal::Signal;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

pub type DeviceId = (u32, u32);

/// Revision the base snap's `current` symlink points to.
pub fn current_base_revision(config: &ConfineConfig, base: &str) -> Result<String> {
    let link = config.base_rootfs(base);
    let target = std::fs::read_link(&link).map_err(|e| {
        ConfineError::Namespace(format!("cannot read symlink {}: {}", link.display(), e))
    })?;
    target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            ConfineError::Namespace(format!(
                "{} points to {} which has no revision",
                link.display(),
                target.display()
            ))
        })
}

/// Device backing `/snap/<base>/<revision>`. The last entry wins because a
/// revision may be mounted more than once, e.g. across a revert.
pub fn base_snap_device(
    entries: &[MountInfoEntry],
    snap_mount_dir: &Path,
    base: &str,
    revision: &str,
) -> Option<DeviceId> {
    let mount_dir = snap_mount_dir.join(base).join(revision);
    entries
        .iter()
        .filter(|e| Path::new(&e.mount_dir) == mount_dir)
        .last()
        .map(MountInfoEntry::device)
}

/// Device of the initial `/` mount of a namespace. Later overmounts of `/`
/// are ignored: the first entry is the root the namespace was built with.
pub fn root_device(entries: &[MountInfoEntry]) -> Option<DeviceId> {
    entries
        .iter()
        .find(|e| e.mount_dir == "/")
        .map(MountInfoEntry::device)
}

pub fn is_stale(base_device: DeviceId, root_device: DeviceId) -> bool {
    base_device != root_device
}

/// Device of the current revision of `base` as seen from this namespace.
pub fn find_base_snap_device(config: &ConfineConfig, base: &str) -> Result<DeviceId> {
    let revision = current_base_revision(config, base)?;
    let entries = read_mountinfo(&config.proc_path("self/mountinfo"))?;
    let device = base_snap_device(&entries, &config.snap_mount_dir, base, &revision).ok_or_else(
        || {
            ConfineError::Namespace(format!(
                "cannot find mount entry for {}",
                config.snap_mount_dir.join(base).join(&revision).display()
            ))
        },
    )?;
    log::debug!(
        "base snap {} revision {} is backed by device {}:{}",
        base,
        revision,
        device.0,
        device.1
    );
    Ok(device)
}

/// Read the root device of the namespace behind `ns` without entering it:
/// a short-lived child enters it and reports back over a pipe.
pub fn probe_root_device(ns: &File) -> Result<DeviceId> {
    let (mut reply_rx, reply_tx) = process::pipe()?;

    let pid = process::spawn("namespace probe", || {
        let mut reply_tx = reply_tx;
        let outcome = process::set_parent_death_signal(Signal::SIGKILL)
            .and_then(|_| enter_mount_ns(ns, "preserved namespace"))
            .and_then(|_| {
                let mut content = String::new();
                File::open("/proc/self/mountinfo")?.read_to_string(&mut content)?;
                let entries = parse_mountinfo(&content)?;
                root_device(&entries)
                    .ok_or_else(|| ConfineError::Namespace("no root mount".to_string()))
            });
        match outcome {
            Ok((major, minor)) => match write!(reply_tx, "{}:{}", major, minor) {
                Ok(()) => 0,
                Err(_) => 1,
            },
            Err(e) => {
                let _ = write!(reply_tx, "error: {}", e);
                1
            }
        }
    })?;

    let mut reply = String::new();
    let read = reply_rx.read_to_string(&mut reply);
    let code = process::wait_exit(pid, "namespace probe")?;
    read?;
    if code != 0 {
        return Err(ConfineError::Namespace(format!(
            "cannot inspect preserved namespace: {}",
            reply.trim()
        )));
    }
    parse_device(&reply).ok_or_else(|| {
        ConfineError::Namespace(format!("unexpected probe reply: {}", reply))
    })
}

fn parse_device(text: &str) -> Option<DeviceId> {
    let (major, minor) = text.trim().split_once(':')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}
