//! Mount namespace state machine of a strictly confined launch.
//!
//! The sequence is fixed:
//! 1. re-associate with init's mount namespace
//! 2. under the global lock: shared snap mount dir, private namespace dir
//! 3. under the snap lock: resolve the strategy, fork the helper, join the
//!    preserved namespace or construct and preserve a new one, fixups
//! 4. for non-root invokers: join or construct the per-user namespace
//! 5. join the freezer group with the effective group raised, still under the
//!    snap lock
//! 6. release the snap lock, then stop the helper
//!
//! Every kernel-facing step goes through [`MountNamespaceHost`] so the order
//! can be checked without privileges.

use crate::config::strategy::LaunchStrategy;
use crate::config::types::{Invocation, Result};
use crate::kernel::credentials::{IdentityOps, Lowered, Privileges};
use crate::kernel::lock::Locker;
use crate::kernel::namespace::{JoinOutcome, MountMode, Preservation};

pub trait MountNamespaceHost {
    /// Move into pid 1's mount namespace if invoked from another one.
    fn reassociate_with_init(&mut self) -> Result<()>;
    fn ensure_shared_propagation(&mut self) -> Result<()>;
    fn initialize_ns_dir(&mut self) -> Result<()>;
    fn resolve_strategy(&mut self, inv: &Invocation) -> Result<LaunchStrategy>;
    fn start_helper(&mut self, inv: &Invocation) -> Result<()>;
    fn join_preserved(&mut self, inv: &Invocation, mode: MountMode) -> Result<JoinOutcome>;
    /// Unshare and populate a new per-snap namespace.
    fn construct(&mut self, inv: &Invocation, mode: MountMode) -> Result<()>;
    fn preserve(&mut self, inv: &Invocation) -> Result<Preservation>;
    fn apply_fixups(&mut self) -> Result<()>;
    fn join_preserved_per_user(&mut self, inv: &Invocation, uid: u32) -> Result<JoinOutcome>;
    /// Unshare and populate a new per-user namespace for `uid:gid`.
    fn construct_per_user(&mut self, inv: &Invocation, uid: u32, gid: u32) -> Result<()>;
    fn preserve_per_user(&mut self, inv: &Invocation, uid: u32) -> Result<Preservation>;
    /// Return to the caller's working directory inside the final namespace.
    fn restore_working_directory(&mut self) -> Result<()>;
    fn join_freezer(&mut self, inv: &Invocation) -> Result<()>;
    fn stop_helper(&mut self) -> Result<()>;
}

/// Put the process into the mount namespace of `inv`.
pub fn prepare_mount_namespace<H, L, O>(
    host: &mut H,
    locker: &L,
    inv: &Invocation,
    privileges: &mut Privileges<Lowered, O>,
) -> Result<LaunchStrategy>
where
    H: MountNamespaceHost,
    L: Locker,
    O: IdentityOps,
{
    let invoker = *privileges.invoker();
    host.reassociate_with_init()?;

    {
        let _global = locker.lock_global()?;
        log::debug!("ensuring that snap mount directory is shared");
        host.ensure_shared_propagation()?;
        log::debug!("unsharing snap namespace directory");
        host.initialize_ns_dir()?;
    }

    let snap_lock = locker.lock_snap(&inv.instance_name)?;
    log::debug!("initializing mount namespace: {}", inv.instance_name);

    // Decided before any transformation: from inside the new namespace the
    // host can no longer be told apart.
    let strategy = host.resolve_strategy(inv)?;

    host.start_helper(inv)?;
    if host.join_preserved(inv, strategy.mount_mode)? == JoinOutcome::NotFound {
        host.construct(inv, strategy.mount_mode)?;
        if host.preserve(inv)? == Preservation::Stale {
            log::warn!(
                "mount namespace of snap {} was not preserved, the next launch rebuilds it",
                inv.instance_name
            );
        }
    }
    host.apply_fixups()?;

    // The root user never gets user mounts.
    if invoker.real_uid != 0 {
        log::debug!("joining preserved per-user mount namespace");
        if host.join_preserved_per_user(inv, invoker.real_uid)? == JoinOutcome::NotFound {
            host.construct_per_user(inv, invoker.real_uid, invoker.real_gid)?;
            if strategy.preserve_per_user {
                if host.preserve_per_user(inv, invoker.real_uid)? == Preservation::Stale {
                    log::warn!(
                        "per-user mount namespace of snap {} for user {} was not preserved",
                        inv.instance_name,
                        invoker.real_uid
                    );
                }
            } else {
                log::debug!("NOT preserving per-user mount namespace");
            }
        }
    }
    host.restore_working_directory()?;

    privileges.with_raised_group(|| host.join_freezer(inv))?;

    drop(snap_lock);
    host.stop_helper()?;
    Ok(strategy)
}
