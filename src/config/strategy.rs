//! Host classification and the per-invocation launch strategy.

use crate::config::settings::{ConfineConfig, FEATURE_PER_USER_MOUNT_NAMESPACE};
use crate::config::types::{Invocation, Result};
use crate::kernel::namespace::registry::{classify, MountMode};
use serde::Serialize;
use std::path::Path;

/// Flavour of the host operating system as far as namespace layout goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Distro {
    /// Any traditional distribution.
    Classic,
    /// Ubuntu Core 16, where `core` is also the host root filesystem.
    Core16,
    /// Ubuntu Core 18 and later.
    CoreOther,
}

/// Classify the contents of an `os-release` file.
pub fn classify_distro(os_release: &str) -> Distro {
    let mut is_core = false;
    let mut version_16 = false;

    for line in os_release.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim_matches('"');
        match key {
            "ID" if value == "ubuntu-core" => is_core = true,
            "VARIANT_ID" if value == "snappy" => is_core = true,
            "VERSION_ID" if value == "16" => version_16 = true,
            _ => {}
        }
    }

    match (is_core, version_16) {
        (false, _) => Distro::Classic,
        (true, true) => Distro::Core16,
        (true, false) => Distro::CoreOther,
    }
}

/// Classify the host. A missing `os-release` means a classic system.
pub fn detect_distro(path: &Path) -> Result<Distro> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(classify_distro(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Distro::Classic),
        Err(e) => Err(e.into()),
    }
}

/// Decisions taken once per invocation and never revisited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LaunchStrategy {
    pub distro: Distro,
    pub mount_mode: MountMode,
    /// Preserve per-user namespaces in the registry instead of discarding them.
    pub preserve_per_user: bool,
}

impl LaunchStrategy {
    pub fn resolve(config: &ConfineConfig, inv: &Invocation) -> Result<Self> {
        let distro = detect_distro(&config.os_release_path)?;
        let strategy = Self {
            distro,
            mount_mode: classify(distro, &inv.base_snap_name),
            preserve_per_user: config.feature_enabled(FEATURE_PER_USER_MOUNT_NAMESPACE),
        };
        log::debug!(
            "launch strategy for {}: {:?}",
            inv.instance_name,
            strategy
        );
        Ok(strategy)
    }
}
