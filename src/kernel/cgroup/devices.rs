//! Device access group for snaps that were granted udev-tagged devices.
//!
//! udev tags every device a snap may use with `snap_<app>`; the tag directory
//! lists them as `c<major>:<minor>` or `b<major>:<minor>`. Snaps without any
//! tagged device run without a devices group.

use crate::config::settings::ConfineConfig;
use crate::config::types::{ConfineError, Result};
use std::fmt;
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Char,
    Block,
}

/// One `devices.allow` line. A missing minor allows every minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRule {
    pub kind: DeviceKind,
    pub major: u32,
    pub minor: Option<u32>,
}

impl DeviceRule {
    const fn char(major: u32, minor: u32) -> Self {
        Self {
            kind: DeviceKind::Char,
            major,
            minor: Some(minor),
        }
    }

    /// Parse a udev tag entry such as `c189:1`. Other entries (e.g. `+usb:...`)
    /// are not device nodes.
    pub fn from_tag_entry(entry: &str) -> Option<Self> {
        let kind = match entry.as_bytes().first()? {
            b'c' => DeviceKind::Char,
            b'b' => DeviceKind::Block,
            _ => return None,
        };
        let (major, minor) = entry[1..].split_once(':')?;
        Some(Self {
            kind,
            major: major.parse().ok()?,
            minor: Some(minor.parse().ok()?),
        })
    }
}

impl fmt::Display for DeviceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            DeviceKind::Char => 'c',
            DeviceKind::Block => 'b',
        };
        match self.minor {
            Some(minor) => write!(f, "{} {}:{} rwm", kind, self.major, minor),
            None => write!(f, "{} {}:* rwm", kind, self.major),
        }
    }
}

/// Devices every confined application may use.
pub const BASELINE_DEVICES: &[DeviceRule] = &[
    DeviceRule::char(1, 3), // /dev/null
    DeviceRule::char(1, 5), // /dev/zero
    DeviceRule::char(1, 7), // /dev/full
    DeviceRule::char(1, 8), // /dev/random
    DeviceRule::char(1, 9), // /dev/urandom
    DeviceRule::char(5, 0), // /dev/tty
    DeviceRule::char(5, 1), // /dev/console
    DeviceRule::char(5, 2), // /dev/ptmx
    DeviceRule {
        kind: DeviceKind::Char,
        major: 136,
        minor: None,
    }, // /dev/pts/*
];

/// udev tag derived from a security tag: `snap.hello.app` → `snap_hello_app`.
pub fn udev_tag(security_tag: &str) -> String {
    security_tag.replace('.', "_")
}

#[derive(Debug, Clone)]
pub struct DeviceCgroup {
    path: PathBuf,
    rules: Vec<DeviceRule>,
}

impl DeviceCgroup {
    /// Plan the devices group of `security_tag`, or `None` when udev tagged
    /// no device for it.
    pub fn for_security_tag(config: &ConfineConfig, security_tag: &str) -> Result<Option<Self>> {
        let tag = udev_tag(security_tag);
        let tag_dir = config.udev_tags_dir.join(&tag);
        let entries = match fs::read_dir(&tag_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("no devices tagged {}, not using a devices cgroup", tag);
                return Ok(None);
            }
            Err(e) => {
                return Err(ConfineError::Cgroup(format!(
                    "cannot read {}: {}",
                    tag_dir.display(),
                    e
                )))
            }
        };

        let mut rules = BASELINE_DEVICES.to_vec();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            match DeviceRule::from_tag_entry(&name.to_string_lossy()) {
                Some(rule) => rules.push(rule),
                None => log::debug!("ignoring udev tag entry {:?}", name),
            }
        }

        Ok(Some(Self {
            path: config.devices_cgroup_dir.join(&tag),
            rules,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rules(&self) -> &[DeviceRule] {
        &self.rules
    }

    /// Create the group, deny everything, allow the planned devices and move
    /// `pid` into it.
    pub fn apply(&self, pid: u32) -> Result<()> {
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

        self.write_control("devices.deny", "a")?;
        for rule in &self.rules {
            self.write_control("devices.allow", &rule.to_string())?;
        }
        self.write_control("cgroup.procs", &pid.to_string())?;
        log::debug!(
            "process {} joined devices cgroup {} with {} allowed devices",
            pid,
            self.path.display(),
            self.rules.len()
        );
        Ok(())
    }

    fn write_control(&self, name: &str, value: &str) -> Result<()> {
        let path = self.path.join(name);
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| ConfineError::Cgroup(format!("cannot open {}: {}", path.display(), e)))?;
        // Each control write is one record.
        file.write_all(value.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .map_err(|e| {
                ConfineError::Cgroup(format!("cannot write {:?} to {}: {}", value, path.display(), e))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_entries() {
        assert_eq!(
            DeviceRule::from_tag_entry("c189:1"),
            Some(DeviceRule::char(189, 1))
        );
        let block = DeviceRule::from_tag_entry("b8:0").unwrap();
        assert_eq!(block.kind, DeviceKind::Block);
        assert_eq!(block.to_string(), "b 8:0 rwm");
        assert_eq!(DeviceRule::from_tag_entry("+usb:1-1"), None);
        assert_eq!(DeviceRule::from_tag_entry("c189"), None);
        assert_eq!(DeviceRule::from_tag_entry(""), None);
    }

    #[test]
    fn rule_rendering() {
        assert_eq!(DeviceRule::char(1, 3).to_string(), "c 1:3 rwm");
        assert_eq!(BASELINE_DEVICES.last().unwrap().to_string(), "c 136:* rwm");
    }

    #[test]
    fn udev_tag_from_security_tag() {
        assert_eq!(udev_tag("snap.hello.app"), "snap_hello_app");
        assert_eq!(udev_tag("snap.hello.hook.configure"), "snap_hello_hook_configure");
    }

    #[test]
    fn untagged_snap_has_no_group() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfineConfig {
            udev_tags_dir: dir.path().to_path_buf(),
            ..ConfineConfig::default()
        };
        assert!(DeviceCgroup::for_security_tag(&config, "snap.hello.app")
            .unwrap()
            .is_none());
    }

    #[test]
    fn tagged_devices_are_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfineConfig {
            udev_tags_dir: dir.path().join("tags"),
            devices_cgroup_dir: dir.path().join("devices"),
            ..ConfineConfig::default()
        };
        let tag_dir = config.udev_tags_dir.join("snap_hello_app");
        fs::create_dir_all(&tag_dir).unwrap();
        fs::write(tag_dir.join("c189:1"), "").unwrap();
        fs::write(tag_dir.join("+usb:1-1"), "").unwrap();
        fs::create_dir_all(&config.devices_cgroup_dir).unwrap();

        let group = DeviceCgroup::for_security_tag(&config, "snap.hello.app")
            .unwrap()
            .unwrap();
        assert_eq!(group.rules().len(), BASELINE_DEVICES.len() + 1);

        group.apply(77).unwrap();
        let allow = fs::read_to_string(group.path().join("devices.allow")).unwrap();
        assert!(allow.contains("c 189:1 rwm\n"));
        assert!(allow.starts_with("c 1:3 rwm\n"));
        assert_eq!(fs::read_to_string(group.path().join("devices.deny")).unwrap(), "a\n");
        assert_eq!(fs::read_to_string(group.path().join("cgroup.procs")).unwrap(), "77\n");
    }
}
