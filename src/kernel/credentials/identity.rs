//! Process identity snapshots and the syscall seam that changes them.

use crate::config::types::{ConfineError, Result};
use nix::unistd::{Gid, Uid};
use serde::Serialize;

/// Real, effective and saved user and group ids, read in one go.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct IdentitySnapshot {
    pub real_uid: u32,
    pub effective_uid: u32,
    pub saved_uid: u32,
    pub real_gid: u32,
    pub effective_gid: u32,
    pub saved_gid: u32,
}

impl IdentitySnapshot {
    /// All six ids set to one user and group.
    pub fn uniform(uid: u32, gid: u32) -> Self {
        Self {
            real_uid: uid,
            effective_uid: uid,
            saved_uid: uid,
            real_gid: gid,
            effective_gid: gid,
            saved_gid: gid,
        }
    }

    /// What a setuid-root binary sees when started by `uid:gid`.
    pub fn setuid_root(uid: u32, gid: u32) -> Self {
        Self {
            real_uid: uid,
            effective_uid: 0,
            saved_uid: 0,
            real_gid: gid,
            effective_gid: gid,
            saved_gid: gid,
        }
    }

    pub fn is_effective_root(&self) -> bool {
        self.effective_uid == 0
    }

    pub fn holds_root(&self) -> bool {
        self.effective_uid == 0 || self.saved_uid == 0 || self.real_uid == 0
    }
}

impl std::fmt::Display for IdentitySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "uid={}/{}/{} gid={}/{}/{}",
            self.real_uid,
            self.effective_uid,
            self.saved_uid,
            self.real_gid,
            self.effective_gid,
            self.saved_gid
        )
    }
}

/// Credential syscalls. `SystemIdentity` talks to the kernel; tests substitute
/// a model that applies the same permission rules.
pub trait IdentityOps {
    fn snapshot(&self) -> Result<IdentitySnapshot>;
    fn set_effective_uid(&mut self, uid: u32) -> Result<()>;
    fn set_effective_gid(&mut self, gid: u32) -> Result<()>;
    /// `setresuid(uid, uid, uid)`
    fn set_all_uids(&mut self, uid: u32) -> Result<()>;
    /// `setresgid(gid, gid, gid)`
    fn set_all_gids(&mut self, gid: u32) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemIdentity;

impl IdentityOps for SystemIdentity {
    fn snapshot(&self) -> Result<IdentitySnapshot> {
        let uids = nix::unistd::getresuid()
            .map_err(|e| ConfineError::Privilege(format!("cannot get user identities: {}", e)))?;
        let gids = nix::unistd::getresgid()
            .map_err(|e| ConfineError::Privilege(format!("cannot get group identities: {}", e)))?;
        Ok(IdentitySnapshot {
            real_uid: uids.real.as_raw(),
            effective_uid: uids.effective.as_raw(),
            saved_uid: uids.saved.as_raw(),
            real_gid: gids.real.as_raw(),
            effective_gid: gids.effective.as_raw(),
            saved_gid: gids.saved.as_raw(),
        })
    }

    fn set_effective_uid(&mut self, uid: u32) -> Result<()> {
        nix::unistd::seteuid(Uid::from_raw(uid))
            .map_err(|e| ConfineError::Privilege(format!("cannot set effective user id to {}: {}", uid, e)))
    }

    fn set_effective_gid(&mut self, gid: u32) -> Result<()> {
        nix::unistd::setegid(Gid::from_raw(gid))
            .map_err(|e| ConfineError::Privilege(format!("cannot set effective group id to {}: {}", gid, e)))
    }

    fn set_all_uids(&mut self, uid: u32) -> Result<()> {
        let uid = Uid::from_raw(uid);
        nix::unistd::setresuid(uid, uid, uid)
            .map_err(|e| ConfineError::Privilege(format!("cannot set user identity to {}: {}", uid, e)))
    }

    fn set_all_gids(&mut self, gid: u32) -> Result<()> {
        let gid = Gid::from_raw(gid);
        nix::unistd::setresgid(gid, gid, gid)
            .map_err(|e| ConfineError::Privilege(format!("cannot set group identity to {}: {}", gid, e)))
    }
}
