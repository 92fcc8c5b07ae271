//! One complete launch: from the setuid entry to `execve` of the application.

use crate::config::settings::ConfineConfig;
use crate::config::types::{ConfineError, Invocation, LaunchRequest, Result};
use crate::exec::delegate::{self, Delegate, SNAP_DISCARD_NS, SNAP_UPDATE_NS};
use crate::exec::host::KernelHost;
use crate::exec::launch::prepare_mount_namespace;
use crate::kernel::cgroup::DeviceCgroup;
use crate::kernel::credentials::{ExecPermit, Privileges, SystemIdentity};
use crate::kernel::lock::LockManager;
use crate::kernel::seccomp::{self, SeccompPlan};
use crate::policy::apparmor::AppArmorState;
use crate::policy::{cookie, selinux, user_data};
use crate::utils::env_finalize::ExecEnvironment;
use crate::utils::secure_env;
use std::convert::Infallible;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Validate `request` and run it. An invalid request fails before any lock
/// is taken or any host state is touched.
pub fn launch_request(config: &ConfineConfig, request: LaunchRequest) -> Result<Infallible> {
    let inv = Invocation::resolve(request)?;
    launch(config, &inv)
}

/// Run `inv`. Only returns on failure.
pub fn launch(config: &ConfineConfig, inv: &Invocation) -> Result<Infallible> {
    log::debug!("security tag: {}", inv.security_tag);
    log::debug!("executable:   {}", inv.executable.display());
    log::debug!(
        "confinement:  {}",
        if inv.is_classic() { "classic" } else { "non-classic" }
    );
    log::debug!("base snap:    {}", inv.base_snap_name);
    config.log_debug_dump();

    let privileges = Privileges::capture(SystemIdentity)?;
    // Root is needed for the namespace and cgroup setup; tests may opt out.
    privileges.require_root(secure_env::secure_var_os("SNAP_CONFINE_NO_ROOT").is_some())?;
    let mut privileges = privileges.lower_group_early()?;

    // A hook keeps the cookie of the process that runs it.
    let cookie = if inv.is_hook() {
        None
    } else {
        cookie::read_cookie(config, &inv.instance_name)
    };

    let apparmor = AppArmorState::detect(config)?;
    apparmor.check_confined(privileges.current())?;

    let mut env = ExecEnvironment::from_current();

    if privileges.current().is_effective_root() {
        if inv.is_classic() {
            log::debug!("skipping sandbox setup, classic confinement in use");
        } else {
            let update_ns = Delegate::open(config, SNAP_UPDATE_NS)?;
            let discard_ns = Delegate::open(config, SNAP_DISCARD_NS)?;
            let locks = LockManager::new(&config.lock_dir)?;
            let mut host = KernelHost::new(
                config,
                &apparmor,
                delegate::delegate_env(&env),
                update_ns,
                discard_ns,
            );
            prepare_mount_namespace(&mut host, &locks, inv, &mut privileges)?;

            if let Some(devices) = DeviceCgroup::for_security_tag(config, &inv.security_tag)? {
                devices.apply(std::process::id())?;
            }
        }
    }

    // The rest runs as the invoking user with root kept as saved uid.
    let mut privileges = privileges.drop_temporarily()?;

    if let Some(dir) = env.get("SNAP_USER_DATA") {
        user_data::prepare_user_data_dir(Path::new(dir))?;
    }

    apparmor.change_onexec(config, &inv.security_tag)?;
    selinux::set_snap_execcon(config)?;

    let filters = SeccompPlan::for_security_tag(config, &inv.security_tag)?;
    if privileges.can_raise() {
        privileges.with_raised_user(|| filters.install())?;
    } else {
        seccomp::set_no_new_privs()?;
        filters.install()?;
    }

    env.finalize(inv, cookie.as_deref());

    let privileges = privileges.drop_permanently()?;
    exec_application(privileges.exec_permit(), inv, &env)
}

/// Replace the process with the application. Requires proof of the final drop.
pub fn exec_application(
    permit: ExecPermit,
    inv: &Invocation,
    env: &ExecEnvironment,
) -> Result<Infallible> {
    let path = CString::new(inv.executable.as_os_str().as_bytes()).map_err(|_| {
        ConfineError::Validation(format!(
            "executable {} contains a NUL byte",
            inv.executable.display()
        ))
    })?;
    let mut argv = vec![path.clone()];
    for arg in &inv.args {
        argv.push(CString::new(arg.as_str()).map_err(|_| {
            ConfineError::Validation("argument contains a NUL byte".to_string())
        })?);
    }
    let envp = env.to_exec_env()?;

    log::debug!("execv({}) as {}", inv.executable.display(), permit.identity());
    for (i, arg) in inv.args.iter().enumerate() {
        log::debug!(" argv[{}] = {}", i + 1, arg);
    }

    let err = match nix::unistd::execve(&path, &argv, &envp) {
        Ok(never) => match never {},
        Err(e) => e,
    };
    Err(ConfineError::Environment(format!(
        "cannot execute {}: {}",
        inv.executable.display(),
        err
    )))
}
