//! Post-transition identity checks. A mismatch is always fatal.

use super::identity::IdentitySnapshot;
use crate::config::types::{ConfineError, Result};

/// Check the effective ids after a temporary change.
pub fn verify_effective(
    snapshot: &IdentitySnapshot,
    uid: Option<u32>,
    gid: Option<u32>,
    step: &str,
) -> Result<()> {
    if let Some(uid) = uid {
        if snapshot.effective_uid != uid {
            return Err(ConfineError::Privilege(format!(
                "{}: effective user id is {} instead of {}",
                step, snapshot.effective_uid, uid
            )));
        }
    }
    if let Some(gid) = gid {
        if snapshot.effective_gid != gid {
            return Err(ConfineError::Privilege(format!(
                "{}: effective group id is {} instead of {}",
                step, snapshot.effective_gid, gid
            )));
        }
    }
    Ok(())
}

/// Check that every id now equals the invoker's real id.
pub fn verify_dropped(snapshot: &IdentitySnapshot, invoker: &IdentitySnapshot) -> Result<()> {
    let expected = IdentitySnapshot::uniform(invoker.real_uid, invoker.real_gid);
    if *snapshot != expected {
        return Err(ConfineError::Privilege(format!(
            "permanent privilege drop left {} instead of {}",
            snapshot, expected
        )));
    }
    if invoker.real_uid != 0 && snapshot.holds_root() {
        return Err(ConfineError::Privilege(format!(
            "root privileges remain after permanent drop ({})",
            snapshot
        )));
    }
    Ok(())
}
