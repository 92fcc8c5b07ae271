//! Well-known host locations used by the launcher.
//!
//! Production always runs with `ConfineConfig::default()`. Every path is a
//! field so tests can point the launcher at a scratch tree instead.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the feature flag file that turns on per-user namespace preservation.
pub const FEATURE_PER_USER_MOUNT_NAMESPACE: &str = "per-user-mount-namespace";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfineConfig {
    /// Where snaps are mounted (`/snap`).
    pub snap_mount_dir: PathBuf,
    /// Registry of preserved mount namespaces.
    pub ns_dir: PathBuf,
    pub lock_dir: PathBuf,
    /// Mount point of the host root filesystem inside a pivoted namespace.
    pub hostfs_dir: PathBuf,
    /// Working directory used when the caller's one is not reachable.
    pub void_dir: PathBuf,
    pub freezer_cgroup_dir: PathBuf,
    pub devices_cgroup_dir: PathBuf,
    /// Root of the unified hierarchy, used when no v1 freezer is mounted.
    pub unified_cgroup_dir: PathBuf,
    pub seccomp_bpf_dir: PathBuf,
    pub cookie_dir: PathBuf,
    pub features_dir: PathBuf,
    pub mount_profile_dir: PathBuf,
    pub udev_tags_dir: PathBuf,
    pub apparmor_fs_dir: PathBuf,
    /// Mount point of selinuxfs; SELinux is enabled when it has `enforce`.
    pub selinux_fs_dir: PathBuf,
    /// `/run/snapd`, relabelled on SELinux systems.
    pub run_dir: PathBuf,
    pub restorecon_path: PathBuf,
    pub os_release_path: PathBuf,
    pub proc_dir: PathBuf,
    /// Directory holding `snap-update-ns` and `snap-discard-ns`. `None` means
    /// next to the running executable.
    pub delegate_dir: Option<PathBuf>,
}

impl Default for ConfineConfig {
    fn default() -> Self {
        Self {
            snap_mount_dir: PathBuf::from("/snap"),
            ns_dir: PathBuf::from("/run/snapd/ns"),
            lock_dir: PathBuf::from("/run/snapd/lock"),
            hostfs_dir: PathBuf::from("/var/lib/snapd/hostfs"),
            void_dir: PathBuf::from("/var/lib/snapd/void"),
            freezer_cgroup_dir: PathBuf::from("/sys/fs/cgroup/freezer"),
            devices_cgroup_dir: PathBuf::from("/sys/fs/cgroup/devices"),
            unified_cgroup_dir: PathBuf::from("/sys/fs/cgroup"),
            seccomp_bpf_dir: PathBuf::from("/var/lib/snapd/seccomp/bpf"),
            cookie_dir: PathBuf::from("/var/lib/snapd/cookie"),
            features_dir: PathBuf::from("/var/lib/snapd/features"),
            mount_profile_dir: PathBuf::from("/var/lib/snapd/mount"),
            udev_tags_dir: PathBuf::from("/run/udev/tags"),
            apparmor_fs_dir: PathBuf::from("/sys/kernel/security/apparmor"),
            selinux_fs_dir: PathBuf::from("/sys/fs/selinux"),
            run_dir: PathBuf::from("/run/snapd"),
            restorecon_path: PathBuf::from("/sbin/restorecon"),
            os_release_path: PathBuf::from("/etc/os-release"),
            proc_dir: PathBuf::from("/proc"),
            delegate_dir: None,
        }
    }
}

impl ConfineConfig {
    /// Registry entry of the per-snap namespace.
    pub fn ns_file(&self, instance: &str) -> PathBuf {
        self.ns_dir.join(format!("{}.mnt", instance))
    }

    /// Registry entry of the per-user namespace.
    pub fn per_user_ns_file(&self, instance: &str, uid: u32) -> PathBuf {
        self.ns_dir.join(format!("{}.{}.mnt", instance, uid))
    }

    /// Root filesystem of a base snap, through its `current` symlink.
    pub fn base_rootfs(&self, base: &str) -> PathBuf {
        self.snap_mount_dir.join(base).join("current")
    }

    pub fn user_fstab(&self, instance: &str) -> PathBuf {
        self.mount_profile_dir
            .join(format!("snap.{}.user-fstab", instance))
    }

    pub fn feature_enabled(&self, feature: &str) -> bool {
        self.features_dir.join(feature).exists()
    }

    pub fn proc_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.proc_dir.join(rel)
    }

    /// Log the effective configuration as one JSON line.
    pub fn log_debug_dump(&self) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        match serde_json::to_string(self) {
            Ok(json) => log::debug!("configuration: {}", json),
            Err(e) => log::debug!("cannot serialize configuration: {}", e),
        }
    }
}
