//! Advisory flock-based locks over the namespace registry.
//!
//! Two scopes exist: the global lock (`<lock_dir>/.lock`) orders the one-time
//! propagation fixups, and the per-snap lock (`<lock_dir>/<instance>.lock`)
//! serializes construction, preservation and discard of one instance's
//! namespaces. Acquisition blocks without a timeout. The kernel drops the lock
//! when the descriptor is closed, so process death releases it too.

use crate::config::types::{ConfineError, LockInfo, Result};
use std::fs::{DirBuilder, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockScope {
    Global,
    Snap(String),
}

impl LockScope {
    fn file_name(&self) -> String {
        match self {
            LockScope::Global => ".lock".to_string(),
            LockScope::Snap(instance) => format!("{}.lock", instance),
        }
    }

    fn describe(&self) -> String {
        match self {
            LockScope::Global => "global".to_string(),
            LockScope::Snap(instance) => format!("snap {}", instance),
        }
    }
}

/// Lock acquisition seam; the launch sequence only needs these two calls.
pub trait Locker {
    type Guard;

    fn lock_global(&self) -> Result<Self::Guard>;
    fn lock_snap(&self, instance: &str) -> Result<Self::Guard>;
}

#[derive(Debug)]
pub struct LockManager {
    lock_dir: PathBuf,
}

impl LockManager {
    /// Open the lock directory, creating it `0755` when missing.
    pub fn new(lock_dir: impl Into<PathBuf>) -> Result<Self> {
        let lock_dir = lock_dir.into();
        DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(&lock_dir)
            .map_err(|e| {
                ConfineError::Lock(format!(
                    "cannot create lock directory {}: {}",
                    lock_dir.display(),
                    e
                ))
            })?;
        if !lock_dir.is_dir() {
            return Err(ConfineError::Lock(format!(
                "lock path {} exists but is not a directory",
                lock_dir.display()
            )));
        }
        Ok(Self { lock_dir })
    }

    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    fn acquire(&self, scope: LockScope) -> Result<LockGuard> {
        let path = self.lock_dir.join(scope.file_name());
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .mode(0o600)
            .custom_flags(libc::O_CLOEXEC | libc::O_NOFOLLOW)
            .open(&path)
            .map_err(|e| {
                ConfineError::Lock(format!("cannot open lock file {}: {}", path.display(), e))
            })?;

        log::debug!("acquiring exclusive lock ({})", scope.describe());
        flock_exclusive(&file).map_err(|e| {
            ConfineError::Lock(format!("cannot acquire {} lock: {}", scope.describe(), e))
        })?;

        let mut guard = LockGuard {
            file: Some(file),
            scope,
            path,
        };
        guard.write_info();
        Ok(guard)
    }
}

impl Locker for LockManager {
    type Guard = LockGuard;

    fn lock_global(&self) -> Result<LockGuard> {
        self.acquire(LockScope::Global)
    }

    fn lock_snap(&self, instance: &str) -> Result<LockGuard> {
        self.acquire(LockScope::Snap(instance.to_string()))
    }
}

fn flock_exclusive(file: &File) -> std::io::Result<()> {
    loop {
        // SAFETY: the descriptor stays open for the duration of the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Held lock. Released exactly once, by `unlock()` or on drop.
#[derive(Debug)]
pub struct LockGuard {
    file: Option<File>,
    scope: LockScope,
    path: PathBuf,
}

impl LockGuard {
    pub fn scope(&self) -> &LockScope {
        &self.scope
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// The record is informational only, so failures are logged and ignored.
    fn write_info(&mut self) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let info = LockInfo {
            pid: std::process::id(),
            scope: self.scope.describe(),
            acquired_at: SystemTime::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let result = serde_json::to_vec(&info)
            .map_err(std::io::Error::other)
            .and_then(|json| {
                file.set_len(0)?;
                file.seek(SeekFrom::Start(0))?;
                file.write_all(&json)?;
                file.flush()
            });
        if let Err(e) = result {
            log::debug!("cannot record lock owner in {}: {}", self.path.display(), e);
        }
    }

    pub fn unlock(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        // An empty file means nobody holds the lock.
        let _ = file.set_len(0);
        // SAFETY: the descriptor is still open; closing it below would also drop the lock.
        unsafe {
            libc::flock(file.as_raw_fd(), libc::LOCK_UN);
        }
        log::debug!("released {} lock", self.scope.describe());
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.unlock();
    }
}

/// Read the diagnostic record of a lock file, if one is present.
pub fn read_lock_info(path: &Path) -> Option<LockInfo> {
    let content = std::fs::read(path).ok()?;
    if content.is_empty() {
        return None;
    }
    serde_json::from_slice(&content).ok()
}

/// Permission bits of the lock directory, for diagnostics.
pub fn lock_dir_mode(path: &Path) -> Result<u32> {
    Ok(std::fs::metadata(path)?.permissions().mode() & 0o7777)
}
