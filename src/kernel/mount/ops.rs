//! Single mount/umount operations with uniform logging and errors.

use crate::config::types::{ConfineError, Result};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use std::fmt;
use std::path::{Path, PathBuf};

/// One `mount(2)` call, planned ahead so sequences can be inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOp {
    pub source: Option<PathBuf>,
    pub target: PathBuf,
    pub fs_type: Option<String>,
    pub flags: MsFlags,
    pub data: Option<String>,
}

impl MountOp {
    /// `mount --bind src dst`, optionally recursive.
    pub fn bind(source: impl Into<PathBuf>, target: impl Into<PathBuf>, recursive: bool) -> Self {
        let mut flags = MsFlags::MS_BIND;
        if recursive {
            flags |= MsFlags::MS_REC;
        }
        Self {
            source: Some(source.into()),
            target: target.into(),
            fs_type: None,
            flags,
            data: None,
        }
    }

    /// Change propagation of an existing mount point.
    pub fn propagation(target: impl Into<PathBuf>, flags: MsFlags) -> Self {
        Self {
            source: Some(PathBuf::from("none")),
            target: target.into(),
            fs_type: None,
            flags,
            data: None,
        }
    }

    pub fn rslave(target: impl Into<PathBuf>) -> Self {
        Self::propagation(target, MsFlags::MS_REC | MsFlags::MS_SLAVE)
    }

    pub fn filesystem(
        fs_type: &str,
        source: &str,
        target: impl Into<PathBuf>,
        flags: MsFlags,
        data: &str,
    ) -> Self {
        Self {
            source: Some(PathBuf::from(source)),
            target: target.into(),
            fs_type: Some(fs_type.to_string()),
            flags,
            data: Some(data.to_string()),
        }
    }

    pub fn apply(&self) -> Result<()> {
        log::debug!("performing operation: {}", self);
        mount(
            self.source.as_deref(),
            self.target.as_path(),
            self.fs_type.as_deref(),
            self.flags,
            self.data.as_deref(),
        )
        .map_err(|e| ConfineError::Mount(format!("cannot perform operation: {}: {}", self, e)))
    }
}

impl fmt::Display for MountOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = flag_names(self.flags);
        let is_propagation_only = self.fs_type.is_none() && !self.flags.contains(MsFlags::MS_BIND);
        write!(f, "mount")?;
        if let Some(fs_type) = &self.fs_type {
            write!(f, " -t {}", fs_type)?;
        }
        if !names.is_empty() {
            write!(f, " --{}", names.join(" --"))?;
        }
        if let Some(data) = &self.data {
            write!(f, " -o {}", data)?;
        }
        match (&self.source, is_propagation_only) {
            (Some(source), false) => write!(f, " {} {}", source.display(), self.target.display()),
            _ => write!(f, " {}", self.target.display()),
        }
    }
}

fn flag_names(flags: MsFlags) -> Vec<&'static str> {
    let rec = flags.contains(MsFlags::MS_REC);
    let mut names = Vec::new();
    let table = [
        (MsFlags::MS_BIND, "bind", "rbind"),
        (MsFlags::MS_SHARED, "make-shared", "make-rshared"),
        (MsFlags::MS_SLAVE, "make-slave", "make-rslave"),
        (MsFlags::MS_PRIVATE, "make-private", "make-rprivate"),
        (MsFlags::MS_UNBINDABLE, "make-unbindable", "make-runbindable"),
    ];
    for (flag, plain, recursive) in table {
        if flags.contains(flag) {
            names.push(if rec { recursive } else { plain });
        }
    }
    for (flag, name) in [
        (MsFlags::MS_RDONLY, "read-only"),
        (MsFlags::MS_NOSUID, "nosuid"),
        (MsFlags::MS_NODEV, "nodev"),
        (MsFlags::MS_NOEXEC, "noexec"),
    ] {
        if flags.contains(flag) {
            names.push(name);
        }
    }
    names
}

pub fn umount(target: &Path, flags: MntFlags) -> Result<()> {
    log::debug!("performing operation: umount {} ({:?})", target.display(), flags);
    umount2(target, flags).map_err(|e| {
        ConfineError::Mount(format!("cannot unmount {}: {}", target.display(), e))
    })
}

/// Join `rel` (absolute or relative) below `root`.
pub fn under(root: &Path, rel: &Path) -> PathBuf {
    root.join(rel.strip_prefix("/").unwrap_or(rel))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_operations() {
        assert_eq!(
            MountOp::bind("/dev", "/tmp/x/dev", true).to_string(),
            "mount --rbind /dev /tmp/x/dev"
        );
        assert_eq!(MountOp::rslave("/tmp/x/dev").to_string(), "mount --make-rslave /tmp/x/dev");
        assert_eq!(
            MountOp::propagation("/snap", MsFlags::MS_SHARED | MsFlags::MS_REC).to_string(),
            "mount --make-rshared /snap"
        );
        assert_eq!(
            MountOp::filesystem(
                "devpts",
                "devpts",
                "/dev/pts",
                MsFlags::empty(),
                "newinstance"
            )
            .to_string(),
            "mount -t devpts -o newinstance devpts /dev/pts"
        );
    }

    #[test]
    fn joins_below_root() {
        assert_eq!(
            under(Path::new("/tmp/root"), Path::new("/var/lib")),
            PathBuf::from("/tmp/root/var/lib")
        );
        assert_eq!(
            under(Path::new("/tmp/root"), Path::new("etc")),
            PathBuf::from("/tmp/root/etc")
        );
    }
}
