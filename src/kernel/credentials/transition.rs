//! Ordered privilege transitions of a setuid-root launch.
//!
//! The order is fixed and enforced by the type parameter:
//! 1. `Initial`: ids as the kernel handed them to the setuid binary
//! 2. `Lowered`: effective gid lowered to the real gid; root uid still held
//! 3. `TemporarilyDropped`: effective ids are the invoker's, saved uid is root
//! 4. `Dropped`: all six ids are the invoker's; only now may exec happen
//!
//! CRITICAL: group ids are always changed BEFORE user ids. Once the user ids
//! are dropped the process may no longer be allowed to change its groups.

use super::identity::{IdentityOps, IdentitySnapshot, SystemIdentity};
use super::validation::{verify_dropped, verify_effective};
use crate::config::types::{ConfineError, Result};
use std::marker::PhantomData;

pub struct Initial;
pub struct Lowered;
pub struct TemporarilyDropped;
pub struct Dropped;

pub struct Privileges<S, O: IdentityOps = SystemIdentity> {
    ops: O,
    invoker: IdentitySnapshot,
    current: IdentitySnapshot,
    _state: PhantomData<S>,
}

/// Proof that the permanent drop happened and was verified.
#[derive(Debug)]
pub struct ExecPermit {
    identity: IdentitySnapshot,
}

impl ExecPermit {
    pub fn identity(&self) -> &IdentitySnapshot {
        &self.identity
    }
}

impl<S, O: IdentityOps> Privileges<S, O> {
    /// Ids at the time the launcher started.
    pub fn invoker(&self) -> &IdentitySnapshot {
        &self.invoker
    }

    pub fn current(&self) -> &IdentitySnapshot {
        &self.current
    }

    fn refresh(&mut self) -> Result<IdentitySnapshot> {
        self.current = self.ops.snapshot()?;
        Ok(self.current)
    }

    fn transition<T>(self) -> Privileges<T, O> {
        Privileges {
            ops: self.ops,
            invoker: self.invoker,
            current: self.current,
            _state: PhantomData,
        }
    }

    fn set_effective_gid_verified(&mut self, gid: u32, step: &str) -> Result<()> {
        self.ops.set_effective_gid(gid)?;
        let now = self.refresh()?;
        verify_effective(&now, None, Some(gid), step)
    }

    fn set_effective_uid_verified(&mut self, uid: u32, step: &str) -> Result<()> {
        self.ops.set_effective_uid(uid)?;
        let now = self.refresh()?;
        verify_effective(&now, Some(uid), None, step)
    }
}

impl<O: IdentityOps> Privileges<Initial, O> {
    pub fn capture(ops: O) -> Result<Self> {
        let invoker = ops.snapshot()?;
        log::debug!("initial identity: {}", invoker);
        Ok(Self {
            ops,
            invoker,
            current: invoker,
            _state: PhantomData,
        })
    }

    /// Refuse to continue without effective root unless the caller explicitly
    /// allows an unprivileged run.
    pub fn require_root(&self, allow_unprivileged: bool) -> Result<()> {
        if self.current.effective_uid == 0 {
            return Ok(());
        }
        if allow_unprivileged {
            log::debug!("running without root privileges as requested");
            return Ok(());
        }
        Err(ConfineError::Privilege(
            "need to run as root or suid".to_string(),
        ))
    }

    /// Lower the effective group to the real group when the binary was
    /// started setgid-root. Root group is re-acquired only in scoped blocks.
    pub fn lower_group_early(mut self) -> Result<Privileges<Lowered, O>> {
        let rgid = self.current.real_gid;
        if self.current.effective_gid == 0 && rgid != 0 {
            self.set_effective_gid_verified(rgid, "lowering effective group")?;
            log::debug!("lowered effective group id to {}", rgid);
        }
        Ok(self.transition())
    }
}

impl<O: IdentityOps> Privileges<Lowered, O> {
    /// Run `f` with the root group as effective group when the saved gid
    /// allows it, then restore the previous effective group.
    pub fn with_raised_group<T>(&mut self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let before = self.current.effective_gid;
        if before == 0 || self.current.saved_gid != 0 {
            return f();
        }

        self.set_effective_gid_verified(0, "raising effective group")?;
        let outcome = f();
        self.set_effective_gid_verified(before, "restoring effective group")?;
        outcome
    }

    /// Switch effective ids to the invoker's while keeping root as saved uid.
    pub fn drop_temporarily(mut self) -> Result<Privileges<TemporarilyDropped, O>> {
        if self.current.effective_uid == 0 {
            let (ruid, rgid) = (self.invoker.real_uid, self.invoker.real_gid);
            self.set_effective_gid_verified(rgid, "dropping effective group")?;
            self.set_effective_uid_verified(ruid, "dropping effective user")?;
            if ruid != 0 && self.current.effective_uid == 0 {
                return Err(ConfineError::Privilege(
                    "effective user id is still root after temporary drop".to_string(),
                ));
            }
            log::debug!("temporarily dropped privileges: {}", self.current);
        }
        Ok(self.transition())
    }
}

impl<O: IdentityOps> Privileges<TemporarilyDropped, O> {
    /// Run `f` with effective uid 0 re-acquired through the saved uid.
    pub fn with_raised_user<T>(&mut self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let before = self.current.effective_uid;
        if before == 0 || self.current.saved_uid != 0 {
            return f();
        }

        self.set_effective_uid_verified(0, "raising effective user")?;
        let outcome = f();
        self.set_effective_uid_verified(before, "restoring effective user")?;
        outcome
    }

    pub fn can_raise(&self) -> bool {
        self.current.effective_uid == 0 || self.current.saved_uid == 0
    }

    /// Irreversibly set every id to the invoker's real ids and verify.
    pub fn drop_permanently(mut self) -> Result<Privileges<Dropped, O>> {
        let (ruid, rgid) = (self.invoker.real_uid, self.invoker.real_gid);
        // CRITICAL: GID before UID
        self.ops.set_all_gids(rgid)?;
        self.ops.set_all_uids(ruid)?;
        let now = self.refresh()?;
        verify_dropped(&now, &self.invoker)?;
        log::debug!("permanently dropped privileges: {}", now);
        Ok(self.transition())
    }
}

impl<O: IdentityOps> Privileges<Dropped, O> {
    pub fn exec_permit(&self) -> ExecPermit {
        ExecPermit {
            identity: self.current,
        }
    }
}
