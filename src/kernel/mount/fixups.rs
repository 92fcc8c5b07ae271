//! Repairs applied inside the per-snap namespace after join or construction.

use crate::config::types::{ConfineError, Result};
use std::fs::Permissions;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

/// Tighten `<root>/var/lib` when it was left world-writable.
pub fn fixup_var_lib(root: &Path) -> Result<bool> {
    let var_lib = root.join("var/lib");
    let meta = std::fs::metadata(&var_lib)
        .map_err(|e| ConfineError::Mount(format!("cannot stat {}: {}", var_lib.display(), e)))?;
    if meta.mode() & 0o777 != 0o777 {
        return Ok(false);
    }

    log::debug!("fixing up permissions of {}", var_lib.display());
    std::os::unix::fs::chown(&var_lib, Some(0), Some(0))
        .map_err(|e| ConfineError::Mount(format!("cannot chown {}: {}", var_lib.display(), e)))?;
    std::fs::set_permissions(&var_lib, Permissions::from_mode(0o755))
        .map_err(|e| ConfineError::Mount(format!("cannot chmod {}: {}", var_lib.display(), e)))?;
    Ok(true)
}

/// Remove nvidia device tags that udev wrongly attached to snaps
/// (`<tags_dir>/snap_*/*nvidia*`). Returns the number of removed entries.
pub fn fixup_udev_tags(tags_dir: &Path) -> Result<usize> {
    let tag_dirs = match std::fs::read_dir(tags_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    for tag_dir in tag_dirs {
        let tag_dir = tag_dir?;
        if !tag_dir.file_name().to_string_lossy().starts_with("snap_")
            || !tag_dir.file_type()?.is_dir()
        {
            continue;
        }
        for device in std::fs::read_dir(tag_dir.path())? {
            let device = device?;
            if !device.file_name().to_string_lossy().contains("nvidia") {
                continue;
            }
            match std::fs::remove_file(device.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("cannot remove {}: {}", device.path().display(), e),
            }
        }
    }
    if removed > 0 {
        log::debug!("removed {} bogus nvidia udev tags", removed);
    }
    Ok(removed)
}
