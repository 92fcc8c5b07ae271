//! AppArmor integration: own confinement check and the exec-time transition
//! into the application's profile.

use crate::config::settings::ConfineConfig;
use crate::config::types::{ConfineError, Result};
use crate::kernel::credentials::IdentitySnapshot;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

const UNCONFINED: &str = "unconfined";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppArmorState {
    /// The kernel has AppArmor enabled.
    pub enabled: bool,
    /// Label of this process, e.g. `/usr/lib/snapd/snap-confine`.
    pub label: Option<String>,
    /// Profile mode, e.g. `enforce` or `complain`.
    pub mode: Option<String>,
}

/// Split `label (mode)` as found in `attr/current`.
pub fn parse_label(text: &str) -> (String, Option<String>) {
    let text = text.trim_end_matches(|c: char| c == '\n' || c == '\0').trim();
    match text.rsplit_once(" (") {
        Some((label, mode)) if mode.ends_with(')') => (
            label.to_string(),
            Some(mode.trim_end_matches(')').to_string()),
        ),
        _ => (text.to_string(), None),
    }
}

fn attr_path(config: &ConfineConfig, name: &str) -> PathBuf {
    config.proc_path(format!("self/attr/apparmor/{}", name))
}

fn legacy_attr_path(config: &ConfineConfig, name: &str) -> PathBuf {
    config.proc_path(format!("self/attr/{}", name))
}

impl AppArmorState {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            label: None,
            mode: None,
        }
    }

    pub fn detect(config: &ConfineConfig) -> Result<Self> {
        if !config.apparmor_fs_dir.is_dir() {
            log::debug!("apparmor is not enabled in the kernel");
            return Ok(Self::disabled());
        }

        let text = match std::fs::read_to_string(attr_path(config, "current")) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                std::fs::read_to_string(legacy_attr_path(config, "current")).map_err(|e| {
                    ConfineError::Policy(format!("cannot read apparmor label: {}", e))
                })?
            }
            Err(e) => {
                return Err(ConfineError::Policy(format!(
                    "cannot read apparmor label: {}",
                    e
                )))
            }
        };
        let (label, mode) = parse_label(&text);
        log::debug!("apparmor label: {}, mode: {:?}", label, mode);
        Ok(Self {
            enabled: true,
            label: Some(label),
            mode,
        })
    }

    pub fn is_confined(&self) -> bool {
        self.enabled && self.label.as_deref().is_some_and(|label| label != UNCONFINED)
    }

    /// Refuse to hold elevated privileges for an unprivileged user while not
    /// confined on a system where confinement is expected.
    pub fn check_confined(&self, current: &IdentitySnapshot) -> Result<()> {
        if self.enabled && !self.is_confined() && current.effective_uid == 0 && current.real_uid != 0
        {
            return Err(ConfineError::Policy(
                "snap-confine has elevated permissions and is not confined but should be. \
                 Refusing to continue to avoid permission escalation attacks"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Ask the kernel to switch to profile `label` at the next exec.
    pub fn change_onexec(&self, config: &ConfineConfig, label: &str) -> Result<()> {
        if !self.enabled {
            log::debug!("apparmor is disabled, not changing profile for exec");
            return Ok(());
        }
        let command = format!("exec {}", label);
        let mut written = write_attr(attr_path(config, "exec"), &command);
        if matches!(&written, Err(e) if e.kind() == ErrorKind::NotFound) {
            written = write_attr(legacy_attr_path(config, "exec"), &command);
        }
        written.map_err(|e| {
            ConfineError::Policy(format!(
                "cannot change profile for the next exec call to {}: {}",
                label, e
            ))
        })?;
        log::debug!("requested apparmor profile {} for the next exec", label);
        Ok(())
    }
}

fn write_attr(path: PathBuf, command: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_CLOEXEC)
        .open(path)?;
    file.write_all(command.as_bytes())
}
