//! Construction of a fresh per-snap (and per-user) mount namespace.
//!
//! Every function here runs inside a namespace that was just unshared; the
//! host is only affected through propagation from shared mounts, which is
//! why the scratch directory is made unbindable and every bind is made a
//! recursive slave.

use super::ops::{under, umount, MountOp};
use crate::config::settings::ConfineConfig;
use crate::config::types::{ConfineError, Invocation, Result};
use crate::kernel::namespace::registry::MountMode;
use nix::mount::{MntFlags, MsFlags};
use std::fs::{DirBuilder, File, OpenOptions, Permissions};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// A host directory made visible inside the namespace.
#[derive(Debug, Clone, Copy)]
pub struct HostMount {
    pub path: &'static str,
    /// Skipped when absent on the host.
    pub optional: bool,
}

const fn required(path: &'static str) -> HostMount {
    HostMount { path, optional: false }
}

const fn optional(path: &'static str) -> HostMount {
    HostMount { path, optional: true }
}

/// Host directories shared with every strictly confined snap, in mount order.
pub const HOST_MOUNTS: &[HostMount] = &[
    required("/dev"),
    required("/etc"),
    required("/home"),
    required("/root"),
    required("/proc"),
    required("/sys"),
    required("/tmp"),
    required("/var/snap"),
    required("/var/lib/snapd"),
    required("/var/tmp"),
    required("/run"),
    optional("/lib/modules"),
    required("/usr/src"),
    required("/var/log"),
    optional("/media"),
    optional("/run/netns"),
    optional("/mnt"),
    optional("/var/lib/extrausers"),
];

/// Entries of the base snap that win over the host `/etc`.
pub const BASE_OVERRIDES: &[&str] = &["/etc/alternatives", "/etc/ssl", "/etc/nsswitch.conf"];

pub const SCRATCH_TEMPLATE: &str = "/tmp/snap.rootfs_XXXXXX";

const DEVPTS_OPTIONS: &str = "newinstance,ptmxmode=0666,mode=0620,gid=5";

/// Mounts that assemble the new root under `scratch`, before the pivot.
pub fn plan_normal_mounts(
    config: &ConfineConfig,
    base_snap_name: &str,
    scratch: &Path,
    exists: impl Fn(&Path) -> bool,
) -> Vec<MountOp> {
    let rootfs = config.base_rootfs(base_snap_name);
    let mut ops = vec![
        MountOp::propagation("/", MsFlags::MS_REC | MsFlags::MS_SHARED),
        MountOp::bind(scratch, scratch, false),
        MountOp::propagation(scratch, MsFlags::MS_UNBINDABLE),
        MountOp::bind(&rootfs, scratch, true),
        MountOp::rslave(scratch),
    ];

    for mount in HOST_MOUNTS {
        let src = Path::new(mount.path);
        if mount.optional && !exists(src) {
            log::debug!("skipping optional host mount {}", mount.path);
            continue;
        }
        let dst = under(scratch, src);
        ops.push(MountOp::bind(src, &dst, true));
        ops.push(MountOp::rslave(dst));
    }

    for entry in BASE_OVERRIDES {
        let src = under(&rootfs, Path::new(entry));
        if !exists(&src) {
            continue;
        }
        let dst = under(scratch, Path::new(entry));
        ops.push(MountOp::bind(src, &dst, false));
        ops.push(MountOp::rslave(dst));
    }

    let snap_dst = under(scratch, &config.snap_mount_dir);
    ops.push(MountOp::bind(&config.snap_mount_dir, &snap_dst, true));
    ops.push(MountOp::rslave(snap_dst));

    // pivot_root refuses a shared put_old directory.
    let hostfs = under(scratch, &config.hostfs_dir);
    ops.push(MountOp::bind(&hostfs, &hostfs, false));
    ops.push(MountOp::propagation(hostfs, MsFlags::MS_PRIVATE));
    ops
}

/// Fill a freshly unshared mount namespace and hand it to `snap-update-ns`.
pub fn populate_mount_ns(
    config: &ConfineConfig,
    inv: &Invocation,
    mode: MountMode,
    run_update_ns: impl FnOnce() -> Result<()>,
) -> Result<()> {
    match mode {
        MountMode::Normal => bootstrap_normal(config, &inv.base_snap_name)?,
        MountMode::Legacy => bootstrap_legacy()?,
    }
    setup_private_tmp(&inv.instance_name)?;
    setup_private_pts()?;
    run_update_ns()
}

fn bootstrap_normal(config: &ConfineConfig, base_snap_name: &str) -> Result<()> {
    let scratch = nix::unistd::mkdtemp(SCRATCH_TEMPLATE).map_err(|e| {
        ConfineError::Mount(format!("cannot create scratch directory {}: {}", SCRATCH_TEMPLATE, e))
    })?;
    log::debug!("scratch directory for constructing namespace: {}", scratch.display());

    for op in plan_normal_mounts(config, base_snap_name, &scratch, |p| p.exists()) {
        op.apply()?;
    }

    pivot_into(config, &scratch)
}

fn pivot_into(config: &ConfineConfig, scratch: &Path) -> Result<()> {
    let put_old = under(scratch, &config.hostfs_dir);
    log::debug!(
        "performing operation: pivot_root {} {}",
        scratch.display(),
        put_old.display()
    );
    nix::unistd::pivot_root(scratch, &put_old).map_err(|e| {
        ConfineError::Mount(format!("cannot pivot into {}: {}", scratch.display(), e))
    })?;
    nix::unistd::chdir("/")
        .map_err(|e| ConfineError::Mount(format!("cannot move to new root: {}", e)))?;

    // The old root is now at hostfs; clean the scratch directory up through it.
    let hostfs = &config.hostfs_dir;
    let old_scratch = under(hostfs, scratch);
    umount(&old_scratch, MntFlags::UMOUNT_NOFOLLOW)?;
    log::debug!("performing operation: rmdir {}", old_scratch.display());
    std::fs::remove_dir(&old_scratch).map_err(|e| {
        ConfineError::Mount(format!("cannot remove {}: {}", old_scratch.display(), e))
    })?;

    MountOp::rslave(hostfs.as_path()).apply()?;

    // Redundant copies confuse tools that inspect the mount table.
    for dir in ["sys", "dev", "proc"] {
        umount(
            &hostfs.join(dir),
            MntFlags::UMOUNT_NOFOLLOW | MntFlags::MNT_DETACH,
        )?;
    }
    Ok(())
}

fn bootstrap_legacy() -> Result<()> {
    // The host root stays the root; only isolate propagation back to it.
    MountOp::rslave("/").apply()
}

/// Bind `/tmp/snap.<instance>/tmp` over `/tmp`.
pub fn setup_private_tmp(instance: &str) -> Result<()> {
    let base = PathBuf::from(format!("/tmp/snap.{}", instance));
    let base_dir = open_root_owned_dir(&base, 0o700)?;

    let tmp_path = base.join("tmp");
    let (tmp_dir, _) = create_and_open_dir(&tmp_path, 0o1777)?;
    std::os::unix::fs::fchown(&tmp_dir, Some(0), Some(0)).map_err(|e| {
        ConfineError::Mount(format!("cannot chown {}: {}", tmp_path.display(), e))
    })?;
    tmp_dir
        .set_permissions(Permissions::from_mode(0o1777))
        .map_err(|e| ConfineError::Mount(format!("cannot chmod {}: {}", tmp_path.display(), e)))?;
    drop(base_dir);

    let fd_path = PathBuf::from(format!("/proc/self/fd/{}", tmp_dir.as_raw_fd()));
    MountOp::bind(fd_path, "/tmp", false).apply()?;
    MountOp::propagation("/tmp", MsFlags::MS_PRIVATE).apply()
}

/// Create `path` unless present and open it without following symlinks.
fn create_and_open_dir(path: &Path, mode: u32) -> Result<(File, bool)> {
    let created = match DirBuilder::new().mode(mode).create(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => false,
        Err(e) => {
            return Err(ConfineError::Mount(format!(
                "cannot create {}: {}",
                path.display(),
                e
            )))
        }
    };

    let dir = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY | libc::O_NOFOLLOW | libc::O_CLOEXEC)
        .open(path)
        .map_err(|e| ConfineError::Mount(format!("cannot open {}: {}", path.display(), e)))?;
    Ok((dir, created))
}

/// Reuse or create a directory that must be root-owned with exactly `mode`.
fn open_root_owned_dir(path: &Path, mode: u32) -> Result<File> {
    let (dir, created) = create_and_open_dir(path, mode)?;
    if created {
        std::os::unix::fs::fchown(&dir, Some(0), Some(0)).map_err(|e| {
            ConfineError::Mount(format!("cannot chown {}: {}", path.display(), e))
        })?;
        dir.set_permissions(Permissions::from_mode(mode))?;
    }

    let meta = dir.metadata()?;
    let actual = meta.mode() & 0o7777;
    if !meta.is_dir() || meta.uid() != 0 || meta.gid() != 0 || actual != mode {
        return Err(ConfineError::Mount(format!(
            "{} is not a root-owned directory with mode {:o} (uid={} gid={} mode={:o})",
            path.display(),
            mode,
            meta.uid(),
            meta.gid(),
            actual
        )));
    }
    Ok(dir)
}

/// Give the namespace its own devpts instance.
pub fn setup_private_pts() -> Result<()> {
    for required in ["/dev/pts/ptmx", "/dev/ptmx"] {
        if !Path::new(required).exists() {
            return Err(ConfineError::Mount(format!("cannot find {}", required)));
        }
    }
    MountOp::filesystem("devpts", "devpts", "/dev/pts", MsFlags::empty(), DEVPTS_OPTIONS)
        .apply()?;
    MountOp::bind("/dev/pts/ptmx", "/dev/ptmx", false).apply()
}

/// Prepare a freshly unshared per-user namespace. Without a user fstab the
/// namespace stays a plain copy of the per-snap one.
pub fn setup_user_mounts(
    config: &ConfineConfig,
    inv: &Invocation,
    run_user_update_ns: impl FnOnce() -> Result<()>,
) -> Result<()> {
    let fstab = config.user_fstab(&inv.instance_name);
    if !fstab.exists() {
        log::debug!("no user mount profile at {}", fstab.display());
        return Ok(());
    }
    // See changes from the per-snap namespace, never propagate back into it.
    MountOp::rslave("/").apply()?;
    run_user_update_ns()
}
