/// Core types shared by every stage of a launch
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use super::validation;

/// Name of the base snap used when `--base` is not given.
pub const DEFAULT_BASE_SNAP: &str = "core";

/// How the target application is confined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confinement {
    /// Private mount namespace, device cgroup, MAC profile and syscall filter.
    Strict,
    /// Host filesystem view; only policy hooks and the privilege drop apply.
    Classic,
}

/// One launch request, validated and immutable once built.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invocation {
    /// Snap name plus optional `_<key>` suffix, e.g. `firefox_beta`.
    pub instance_name: String,
    /// Snap name with the instance key stripped.
    pub snap_name: String,
    pub base_snap_name: String,
    /// MAC / seccomp label, e.g. `snap.firefox.firefox` or `snap.foo.hook.configure`.
    pub security_tag: String,
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub confinement: Confinement,
}

/// Raw launch request as it arrives from the command line and the environment.
#[derive(Clone, Debug, Default)]
pub struct LaunchRequest {
    pub instance_name: Option<String>,
    pub security_tag: String,
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub base_snap_name: Option<String>,
    pub classic: bool,
}

impl Invocation {
    /// Validate a raw request. Nothing on the host is touched, so a rejected
    /// request never reaches a lock or a namespace.
    pub fn resolve(request: LaunchRequest) -> Result<Self> {
        let instance_name = match request.instance_name {
            Some(name) if !name.is_empty() => name,
            _ => {
                return Err(ConfineError::Validation(
                    "SNAP_INSTANCE_NAME is not set".to_string(),
                ))
            }
        };

        validation::validate_instance_name(&instance_name)?;
        let snap_name = validation::snap_name_of(&instance_name).to_string();

        if !validation::verify_security_tag(&request.security_tag, &instance_name) {
            return Err(ConfineError::Validation(format!(
                "security tag {} not allowed for snap instance {}",
                request.security_tag, instance_name
            )));
        }

        let base_snap_name = request
            .base_snap_name
            .unwrap_or_else(|| DEFAULT_BASE_SNAP.to_string());
        validation::validate_snap_name(&base_snap_name).map_err(|e| {
            ConfineError::Validation(format!("invalid base snap name {}: {}", base_snap_name, e))
        })?;

        if request.executable.as_os_str().is_empty() {
            return Err(ConfineError::Validation(
                "executable path is empty".to_string(),
            ));
        }

        Ok(Self {
            instance_name,
            snap_name,
            base_snap_name,
            security_tag: request.security_tag,
            executable: request.executable,
            args: request.args,
            confinement: if request.classic {
                Confinement::Classic
            } else {
                Confinement::Strict
            },
        })
    }

    pub fn is_hook(&self) -> bool {
        validation::is_hook_security_tag(&self.security_tag)
    }

    pub fn is_classic(&self) -> bool {
        self.confinement == Confinement::Classic
    }
}

/// Error type for everything the launcher does. All variants are fatal except
/// where a caller maps a specific failure to `JoinOutcome::NotFound` or
/// `Preservation::Stale`.
#[derive(Error, Debug)]
pub enum ConfineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid invocation: {0}")]
    Validation(String),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("namespace error: {0}")]
    Namespace(String),

    #[error("mount error: {0}")]
    Mount(String),

    #[error("privilege error: {0}")]
    Privilege(String),

    #[error("cgroup error: {0}")]
    Cgroup(String),

    #[error("delegate error: {0}")]
    Delegate(String),

    #[error("security policy error: {0}")]
    Policy(String),

    #[error("environment error: {0}")]
    Environment(String),
}

pub type Result<T> = std::result::Result<T, ConfineError>;

/// Diagnostic record written into a held lock file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub scope: String,
    pub acquired_at: std::time::SystemTime,
    pub version: String,
}
