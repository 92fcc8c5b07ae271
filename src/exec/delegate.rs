//! Helper programs shipped next to the launcher (`snap-update-ns`,
//! `snap-discard-ns`).
//!
//! Delegates are opened by descriptor before any namespace change, so the
//! program that runs is the one installed alongside the launcher even after
//! the root filesystem was pivoted away.

use crate::config::settings::ConfineConfig;
use crate::config::types::{ConfineError, Result};
use crate::kernel::process;
use crate::policy::apparmor::AppArmorState;
use crate::utils::env_finalize::ExecEnvironment;
use nix::unistd::{Gid, Uid};
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

pub const SNAP_UPDATE_NS: &str = "snap-update-ns";
pub const SNAP_DISCARD_NS: &str = "snap-discard-ns";

/// Variables a delegate inherits from the launcher's environment.
const FORWARDED_ENV: &[&str] = &["SNAP_CONFINE_DEBUG", "SNAPD_DEBUG", "XDG_RUNTIME_DIR"];

/// Directory the delegates are installed in.
pub fn delegate_dir(config: &ConfineConfig) -> Result<PathBuf> {
    if let Some(dir) = &config.delegate_dir {
        return Ok(dir.clone());
    }
    let exe_link = config.proc_path("self/exe");
    let exe = std::fs::read_link(&exe_link).map_err(|e| {
        ConfineError::Delegate(format!("cannot read {}: {}", exe_link.display(), e))
    })?;
    exe.parent().map(Path::to_path_buf).ok_or_else(|| {
        ConfineError::Delegate(format!("{} has no parent directory", exe.display()))
    })
}

/// Environment passed to delegates: only the debugging and runtime-dir
/// variables of the caller.
pub fn delegate_env(caller: &ExecEnvironment) -> ExecEnvironment {
    let mut env = ExecEnvironment::default();
    for key in FORWARDED_ENV {
        if let Some(value) = caller.get(key) {
            env.set(key, value);
        }
    }
    env
}

/// Options of one delegate run.
#[derive(Debug, Default)]
pub struct RunOptions<'a> {
    /// Switch to this uid and gid before exec.
    pub run_as: Option<(u32, u32)>,
    /// Confine the delegate with this AppArmor profile.
    pub apparmor: Option<(&'a AppArmorState, &'a ConfineConfig, String)>,
}

#[derive(Debug)]
pub struct Delegate {
    name: String,
    path: PathBuf,
    file: File,
}

impl Delegate {
    pub fn open(config: &ConfineConfig, name: &str) -> Result<Self> {
        let path = delegate_dir(config)?.join(name);
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_PATH | libc::O_NOFOLLOW | libc::O_CLOEXEC)
            .open(&path)
            .map_err(|e| {
                ConfineError::Delegate(format!("cannot open {}: {}", path.display(), e))
            })?;
        log::debug!("opened delegate {}", path.display());
        Ok(Self {
            name: name.to_string(),
            path,
            file,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the delegate with `args` and wait for it. A non-zero exit is an error.
    pub fn run(&self, args: &[&str], env: &ExecEnvironment, options: RunOptions<'_>) -> Result<()> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(self.cstring(&self.name)?);
        for arg in args {
            argv.push(self.cstring(arg)?);
        }
        let envp = env.to_exec_env()?;
        let fd = self.file.as_raw_fd();
        log::debug!("running {} {}", self.name, args.join(" "));

        let pid = process::spawn(&self.name, || {
            if let Some((uid, gid)) = options.run_as {
                let gid = Gid::from_raw(gid);
                let uid = Uid::from_raw(uid);
                if nix::unistd::setresgid(gid, gid, gid).is_err()
                    || nix::unistd::setresuid(uid, uid, uid).is_err()
                {
                    return 126;
                }
            }
            if let Some((state, config, label)) = &options.apparmor {
                if state.change_onexec(config, label).is_err() {
                    return 126;
                }
            }
            // Only returns on failure.
            let _ = nix::unistd::fexecve(fd, &argv, &envp);
            127
        })?;

        match process::wait_exit(pid, &self.name)? {
            0 => Ok(()),
            126 => Err(ConfineError::Delegate(format!(
                "cannot prepare the environment of {}",
                self.name
            ))),
            127 => Err(ConfineError::Delegate(format!(
                "cannot execute {}",
                self.path.display()
            ))),
            code => Err(ConfineError::Delegate(format!(
                "{} failed with exit status {}",
                self.name, code
            ))),
        }
    }

    fn cstring(&self, arg: &str) -> Result<CString> {
        CString::new(arg).map_err(|_| {
            ConfineError::Delegate(format!("argument of {} contains a NUL byte", self.name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin_config() -> ConfineConfig {
        ConfineConfig {
            delegate_dir: Some(PathBuf::from("/bin")),
            ..ConfineConfig::default()
        }
    }

    #[test]
    fn missing_delegate_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfineConfig {
            delegate_dir: Some(dir.path().to_path_buf()),
            ..ConfineConfig::default()
        };
        assert!(matches!(
            Delegate::open(&config, SNAP_UPDATE_NS),
            Err(ConfineError::Delegate(_))
        ));
    }

    #[test]
    fn default_dir_is_next_to_the_executable() {
        let dir = delegate_dir(&ConfineConfig::default()).unwrap();
        let exe = std::env::current_exe().unwrap();
        assert_eq!(Some(dir.as_path()), exe.parent());
    }

    #[test]
    fn only_debug_and_runtime_dir_are_forwarded() {
        let caller = ExecEnvironment::from_vars([
            ("SNAP_CONFINE_DEBUG", "1"),
            ("XDG_RUNTIME_DIR", "/run/user/1000"),
            ("LD_PRELOAD", "/evil.so"),
        ]);
        let env = delegate_env(&caller);
        assert_eq!(env.len(), 2);
        assert!(env.get("LD_PRELOAD").is_none());
    }

    #[test]
    fn exit_status_is_propagated() {
        let config = bin_config();
        let env = ExecEnvironment::default();
        Delegate::open(&config, "true")
            .unwrap()
            .run(&[], &env, RunOptions::default())
            .unwrap();
        assert!(Delegate::open(&config, "false")
            .unwrap()
            .run(&["--from-snap-confine", "hello"], &env, RunOptions::default())
            .is_err());
    }
}
