//! `SNAP_USER_DATA` provisioning.

use crate::config::types::{ConfineError, Result};
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

/// Create the user data directory (and its parents) with mode 0755. Must run
/// with the invoking user's effective ids so the directories belong to them.
pub fn prepare_user_data_dir(dir: &Path) -> Result<()> {
    if !dir.is_absolute() {
        return Err(ConfineError::Environment(format!(
            "user data directory {} is not absolute",
            dir.display()
        )));
    }
    DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(dir)
        .map_err(|e| {
            ConfineError::Environment(format!(
                "cannot create user data directory {}: {}",
                dir.display(),
                e
            ))
        })?;
    log::debug!("user data directory {} is ready", dir.display());
    Ok(())
}
