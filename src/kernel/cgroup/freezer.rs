//! Per-snap process tracking group `snap.<instance>`.

use super::backend::{backend_type_name, detect_cgroup_backend, CgroupBackendType};
use crate::config::settings::ConfineConfig;
use crate::config::types::{ConfineError, Result};
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FreezerGroup {
    path: PathBuf,
    backend: CgroupBackendType,
}

impl FreezerGroup {
    /// Group of `instance` on whichever hierarchy is available.
    pub fn for_instance(config: &ConfineConfig, instance: &str) -> Result<Self> {
        let backend = detect_cgroup_backend(config).ok_or_else(|| {
            ConfineError::Cgroup("no cgroup hierarchy available for process tracking".to_string())
        })?;
        Ok(Self::with_backend(config, instance, backend))
    }

    pub fn with_backend(config: &ConfineConfig, instance: &str, backend: CgroupBackendType) -> Self {
        let root = match backend {
            CgroupBackendType::V1 => &config.freezer_cgroup_dir,
            CgroupBackendType::V2 => &config.unified_cgroup_dir,
        };
        Self {
            path: root.join(format!("snap.{}", instance)),
            backend,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backend(&self) -> CgroupBackendType {
        self.backend
    }

    /// Create the group (idempotent) and move `pid` into it.
    pub fn join(&self, pid: u32) -> Result<()> {
        match DirBuilder::new().mode(0o755).create(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(ConfineError::Cgroup(format!(
                    "cannot create {}: {}",
                    self.path.display(),
                    e
                )))
            }
        }

        // cgroup.procs moves every thread of the process on both hierarchies.
        let membership = self.path.join("cgroup.procs");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(&membership)
            .map_err(|e| {
                ConfineError::Cgroup(format!("cannot open {}: {}", membership.display(), e))
            })?;
        write!(file, "{}", pid).map_err(|e| {
            ConfineError::Cgroup(format!(
                "cannot move process {} to {}: {}",
                pid,
                self.path.display(),
                e
            ))
        })?;

        log::debug!(
            "moved process {} to {} group {}",
            pid,
            backend_type_name(self.backend),
            self.path.display()
        );
        Ok(())
    }

    /// Whether any process is still in the group. A group that was never
    /// created is unoccupied.
    pub fn is_occupied(&self) -> Result<bool> {
        let procs = self.path.join("cgroup.procs");
        let content = match fs::read_to_string(&procs) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(ConfineError::Cgroup(format!(
                    "cannot read {}: {}",
                    procs.display(),
                    e
                )))
            }
        };
        let occupied = content.lines().any(|line| line.trim().parse::<u32>().is_ok());
        log::debug!(
            "group {} is {}",
            self.path.display(),
            if occupied { "occupied" } else { "empty" }
        );
        Ok(occupied)
    }
}
