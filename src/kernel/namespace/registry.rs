//! Registry of preserved mount namespaces (`/run/snapd/ns`).
//!
//! An entry `<instance>.mnt` (or `<instance>.<uid>.mnt` for per-user
//! namespaces) is a bind mount of a namespace file (nsfs). Every mutation of
//! an instance's entries happens under that instance's lock.

use super::enter_mount_ns;
use super::helper::{Helper, Preservation};
use super::probe;
use crate::config::settings::ConfineConfig;
use crate::config::strategy::Distro;
use crate::config::types::{ConfineError, Invocation, Result};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Filesystem magic of namespace files.
pub const NSFS_MAGIC: i64 = 0x6e73_6673;
/// Older kernels expose namespace files on procfs.
pub const PROC_SUPER_MAGIC: i64 = 0x9fa0;

/// How the per-snap namespace is assembled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MountMode {
    /// Pivot into the base snap with host directories bound in.
    Normal,
    /// Ubuntu Core 16 with `core` as base: the host root already is the base.
    Legacy,
}

/// Pure mapping from the host flavour and base snap to a mount mode.
pub fn classify(distro: Distro, base_snap_name: &str) -> MountMode {
    if distro == Distro::Core16 && base_snap_name == "core" {
        MountMode::Legacy
    } else {
        MountMode::Normal
    }
}

/// State of one registry entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleState {
    /// No entry; nothing was ever preserved.
    Absent,
    /// A plain placeholder left behind by a construction that never finished.
    Abandoned,
    /// A live namespace file.
    Preserved,
    /// A live namespace file built from a base revision that is no longer current.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    NotFound,
}

/// Classify an entry from its filesystem magic, `None` meaning no entry.
pub fn classify_handle(fs_magic: Option<i64>) -> HandleState {
    match fs_magic {
        None => HandleState::Absent,
        Some(NSFS_MAGIC) | Some(PROC_SUPER_MAGIC) => HandleState::Preserved,
        Some(_) => HandleState::Abandoned,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NamespaceRegistry<'a> {
    config: &'a ConfineConfig,
}

impl<'a> NamespaceRegistry<'a> {
    pub fn new(config: &'a ConfineConfig) -> Self {
        Self { config }
    }

    pub fn dir(&self) -> &Path {
        &self.config.ns_dir
    }

    pub fn ns_path(&self, instance: &str) -> PathBuf {
        self.config.ns_file(instance)
    }

    pub fn per_user_ns_path(&self, instance: &str, uid: u32) -> PathBuf {
        self.config.per_user_ns_file(instance, uid)
    }

    /// Namespace file of a process, as seen through procfs.
    pub fn proc_ns_of(&self, pid: i32) -> PathBuf {
        self.config.proc_path(format!("{}/ns/mnt", pid))
    }

    /// Open an entry and classify it. Opening never creates the entry.
    pub fn open_entry(&self, path: &Path) -> Result<(HandleState, Option<File>)> {
        let file = match OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NOFOLLOW | libc::O_CLOEXEC)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((HandleState::Absent, None))
            }
            Err(e) => {
                return Err(ConfineError::Namespace(format!(
                    "cannot open preserved namespace {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let stat = nix::sys::statfs::fstatfs(&file).map_err(|e| {
            ConfineError::Namespace(format!("cannot inspect {}: {}", path.display(), e))
        })?;
        let magic = stat.filesystem_type().0 as i64;
        Ok((classify_handle(Some(magic)), Some(file)))
    }

    /// Join the preserved per-snap namespace of `inv`, if there is a usable one.
    ///
    /// In normal mode a preserved namespace built from an older base revision
    /// is stale. It is discarded (via `discard`) when no process of the snap
    /// is alive according to `occupied`, otherwise it is joined anyway so all
    /// running processes of the snap keep sharing one view.
    pub fn join_preserved(
        &self,
        inv: &Invocation,
        mode: MountMode,
        occupied: impl FnOnce() -> Result<bool>,
        discard: impl FnOnce() -> Result<()>,
    ) -> Result<JoinOutcome> {
        let path = self.ns_path(&inv.instance_name);
        let (state, file) = self.open_entry(&path)?;
        let file = match (state, file) {
            (HandleState::Preserved, Some(file)) => file,
            (HandleState::Abandoned, _) => {
                log::debug!(
                    "{} is not a namespace file, construction was interrupted",
                    path.display()
                );
                return Ok(JoinOutcome::NotFound);
            }
            _ => return Ok(JoinOutcome::NotFound),
        };

        if mode == MountMode::Normal && self.is_stale(inv, &file)? {
            if !occupied()? {
                log::debug!(
                    "discarding stale mount namespace of snap {}",
                    inv.instance_name
                );
                drop(file);
                discard()?;
                return Ok(JoinOutcome::NotFound);
            }
            log::debug!(
                "mount namespace of snap {} is stale but still in use",
                inv.instance_name
            );
        }

        enter_mount_ns(&file, &format!("snap {}", inv.instance_name))?;
        log::debug!("joined preserved mount namespace of snap {}", inv.instance_name);
        Ok(JoinOutcome::Joined)
    }

    fn is_stale(&self, inv: &Invocation, ns: &File) -> Result<bool> {
        let base = probe::find_base_snap_device(self.config, &inv.base_snap_name)?;
        let root = probe::probe_root_device(ns)?;
        let stale = probe::is_stale(base, root);
        if stale {
            log::debug!(
                "preserved namespace root {}:{} differs from base device {}:{}",
                root.0,
                root.1,
                base.0,
                base.1
            );
        }
        Ok(stale)
    }

    /// Join the preserved per-user namespace. Per-user namespaces carry no
    /// staleness: they are rebuilt together with their per-snap parent.
    pub fn join_preserved_per_user(&self, inv: &Invocation, uid: u32) -> Result<JoinOutcome> {
        let path = self.per_user_ns_path(&inv.instance_name, uid);
        match self.open_entry(&path)? {
            (HandleState::Preserved, Some(file)) => {
                enter_mount_ns(
                    &file,
                    &format!("snap {} for user {}", inv.instance_name, uid),
                )?;
                log::debug!(
                    "joined preserved per-user mount namespace of snap {}",
                    inv.instance_name
                );
                Ok(JoinOutcome::Joined)
            }
            _ => Ok(JoinOutcome::NotFound),
        }
    }

    /// Publish the current (freshly built) namespace of this process.
    pub fn preserve(&self, inv: &Invocation, helper: &mut Helper) -> Result<Preservation> {
        let outcome = helper.capture_mount_ns()?;
        if outcome == Preservation::Published {
            log::debug!(
                "preserved mount namespace of snap {} at {}",
                inv.instance_name,
                self.ns_path(&inv.instance_name).display()
            );
        }
        Ok(outcome)
    }

    pub fn preserve_per_user(
        &self,
        inv: &Invocation,
        uid: u32,
        helper: &mut Helper,
    ) -> Result<Preservation> {
        let outcome = helper.capture_per_user_mount_ns(uid)?;
        if outcome == Preservation::Published {
            log::debug!(
                "preserved per-user mount namespace of snap {} at {}",
                inv.instance_name,
                self.per_user_ns_path(&inv.instance_name, uid).display()
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Confinement;

    fn invocation() -> Invocation {
        Invocation {
            instance_name: "hello".into(),
            snap_name: "hello".into(),
            base_snap_name: "core".into(),
            security_tag: "snap.hello.hello".into(),
            executable: "/bin/true".into(),
            args: vec![],
            confinement: Confinement::Strict,
        }
    }

    #[test]
    fn classify_is_pure() {
        for distro in [Distro::Classic, Distro::Core16, Distro::CoreOther] {
            for base in ["core", "core18", "bare"] {
                assert_eq!(classify(distro, base), classify(distro, base));
            }
        }
        assert_eq!(classify(Distro::Core16, "core"), MountMode::Legacy);
        assert_eq!(classify(Distro::Core16, "core18"), MountMode::Normal);
        assert_eq!(classify(Distro::Classic, "core"), MountMode::Normal);
        assert_eq!(classify(Distro::CoreOther, "core"), MountMode::Normal);
    }

    #[test]
    fn handle_states() {
        assert_eq!(classify_handle(None), HandleState::Absent);
        assert_eq!(classify_handle(Some(NSFS_MAGIC)), HandleState::Preserved);
        assert_eq!(classify_handle(Some(PROC_SUPER_MAGIC)), HandleState::Preserved);
        // tmpfs
        assert_eq!(classify_handle(Some(0x0102_1994)), HandleState::Abandoned);
    }

    #[test]
    fn missing_entry_is_not_found_and_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfineConfig {
            ns_dir: dir.path().to_path_buf(),
            ..ConfineConfig::default()
        };
        let registry = NamespaceRegistry::new(&config);

        let outcome = registry
            .join_preserved(
                &invocation(),
                MountMode::Normal,
                || panic!("occupancy must not be queried"),
                || panic!("nothing to discard"),
            )
            .unwrap();
        assert_eq!(outcome, JoinOutcome::NotFound);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn plain_file_is_abandoned() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfineConfig {
            ns_dir: dir.path().to_path_buf(),
            ..ConfineConfig::default()
        };
        let registry = NamespaceRegistry::new(&config);
        std::fs::write(registry.ns_path("hello"), b"").unwrap();
        std::fs::write(registry.per_user_ns_path("hello", 1000), b"").unwrap();

        let (state, _) = registry.open_entry(&registry.ns_path("hello")).unwrap();
        assert_eq!(state, HandleState::Abandoned);

        let outcome = registry
            .join_preserved(
                &invocation(),
                MountMode::Normal,
                || Ok(false),
                || Ok(()),
            )
            .unwrap();
        assert_eq!(outcome, JoinOutcome::NotFound);
        assert_eq!(
            registry.join_preserved_per_user(&invocation(), 1000).unwrap(),
            JoinOutcome::NotFound
        );
    }

    #[test]
    fn registry_paths() {
        let config = ConfineConfig::default();
        let registry = NamespaceRegistry::new(&config);
        assert_eq!(registry.proc_ns_of(42), PathBuf::from("/proc/42/ns/mnt"));
        assert_eq!(registry.dir(), Path::new("/run/snapd/ns"));
    }
}
