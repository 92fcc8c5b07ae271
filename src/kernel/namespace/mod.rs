//! Mount namespace primitives: unshare, setns and the preserved-namespace
//! registry built on top of them.

pub mod helper;
pub mod probe;
pub mod registry;

use crate::config::settings::ConfineConfig;
use crate::config::types::{ConfineError, Result};
use nix::sched::{setns, unshare, CloneFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

pub use helper::{Helper, Preservation};
pub use registry::{JoinOutcome, MountMode, NamespaceRegistry};

/// Detach into a private copy of the current mount namespace.
pub fn unshare_mount_ns() -> Result<()> {
    log::debug!("unsharing the mount namespace");
    unshare(CloneFlags::CLONE_NEWNS)
        .map_err(|e| ConfineError::Namespace(format!("cannot unshare the mount namespace: {}", e)))
}

/// Enter the mount namespace referenced by `ns`.
pub fn enter_mount_ns(ns: &File, what: &str) -> Result<()> {
    setns(ns, CloneFlags::CLONE_NEWNS).map_err(|e| {
        ConfineError::Namespace(format!("cannot join mount namespace of {}: {}", what, e))
    })
}

/// Move to the mount namespace of init when invoked from inside another one,
/// e.g. from an application that is itself confined.
pub fn reassociate_with_pid1(config: &ConfineConfig) -> Result<()> {
    let init_ns = config.proc_path("1/ns/mnt");
    let self_ns = config.proc_path("self/ns/mnt");
    let init_id = std::fs::read_link(&init_ns).map_err(|e| {
        ConfineError::Namespace(format!("cannot read {}: {}", init_ns.display(), e))
    })?;
    let self_id = std::fs::read_link(&self_ns).map_err(|e| {
        ConfineError::Namespace(format!("cannot read {}: {}", self_ns.display(), e))
    })?;
    if init_id == self_id {
        return Ok(());
    }

    log::debug!("moving to mount namespace of pid 1");
    let ns = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_CLOEXEC | libc::O_NOFOLLOW)
        .open(&init_ns)
        .map_err(|e| {
            ConfineError::Namespace(format!("cannot open {}: {}", init_ns.display(), e))
        })?;
    enter_mount_ns(&ns, "pid 1")
}

/// Working directory of the caller, restored after a namespace switch so the
/// application starts where it was launched from.
#[derive(Debug)]
pub struct SavedCwd {
    path: Option<PathBuf>,
}

impl SavedCwd {
    pub fn capture() -> Self {
        match std::env::current_dir() {
            Ok(path) => Self { path: Some(path) },
            Err(e) => {
                log::debug!("cannot get the current working directory: {}", e);
                Self { path: None }
            }
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Return to the saved directory or, when it does not exist in the new
    /// namespace, to `fallback`.
    pub fn restore(&self, fallback: &Path) -> Result<()> {
        if let Some(path) = &self.path {
            match std::env::set_current_dir(path) {
                Ok(()) => return Ok(()),
                Err(e) => log::debug!(
                    "cannot restore working directory {}: {}",
                    path.display(),
                    e
                ),
            }
        }
        log::debug!("moving to {}", fallback.display());
        std::env::set_current_dir(fallback).map_err(|e| {
            ConfineError::Namespace(format!(
                "cannot move to {}: {}",
                fallback.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassociation_is_a_noop_in_the_same_namespace() {
        // /proc/self/ns/mnt compared against itself through a fake pid 1.
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("1/ns")).unwrap();
        std::fs::create_dir_all(dir.path().join("self/ns")).unwrap();
        std::os::unix::fs::symlink("mnt:[4026531840]", dir.path().join("1/ns/mnt")).unwrap();
        std::os::unix::fs::symlink("mnt:[4026531840]", dir.path().join("self/ns/mnt")).unwrap();

        let config = ConfineConfig {
            proc_dir: dir.path().to_path_buf(),
            ..ConfineConfig::default()
        };
        reassociate_with_pid1(&config).unwrap();
    }

    #[test]
    fn restore_falls_back_when_cwd_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = tempfile::tempdir().unwrap();
        let saved = SavedCwd {
            path: Some(dir.path().join("vanished")),
        };
        let before = std::env::current_dir().unwrap();
        saved.restore(fallback.path()).unwrap();
        assert_eq!(
            std::env::current_dir().unwrap().canonicalize().unwrap(),
            fallback.path().canonicalize().unwrap()
        );
        std::env::set_current_dir(before).unwrap();
    }
}
