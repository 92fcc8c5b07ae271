//! Environment handed to the application.
//!
//! The launcher never edits its own process environment; it builds an
//! explicit map from it, adjusts that map and passes it to `execve`.

use crate::config::types::{ConfineError, Invocation, Result};
use std::collections::BTreeMap;
use std::ffi::{CString, OsStr, OsString};
use std::os::unix::ffi::OsStrExt;

/// `PATH` inside a strictly confined snap.
pub const CORE_PATH: &str =
    "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin:/usr/games:/usr/local/games";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecEnvironment {
    vars: BTreeMap<OsString, OsString>,
}

impl ExecEnvironment {
    pub fn from_current() -> Self {
        Self::from_vars(std::env::vars_os())
    }

    pub fn from_vars<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<OsString>,
        V: Into<OsString>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&OsStr> {
        self.vars.get(OsStr::new(key)).map(OsString::as_os_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<OsString>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<OsString> {
        self.vars.remove(OsStr::new(key))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Apply the launcher's adjustments for `inv`.
    ///
    /// Strictly confined applications get the core `PATH` and see `/tmp` as
    /// their temporary directory (their `/tmp` is private). Every non-hook
    /// application that has a cookie learns it through `SNAP_COOKIE` and the
    /// older `SNAP_CONTEXT`.
    pub fn finalize(&mut self, inv: &Invocation, cookie: Option<&str>) {
        if !inv.is_classic() {
            self.set("PATH", CORE_PATH);
            for key in ["TMPDIR", "TEMPDIR"] {
                if let Some(old) = self.get(key) {
                    if old != OsStr::new("/tmp") {
                        log::debug!("resetting {} from {:?} to /tmp", key, old);
                    }
                }
                self.set(key, "/tmp");
            }
        }

        if let Some(cookie) = cookie {
            if !inv.is_hook() {
                self.set("SNAP_COOKIE", cookie);
                self.set("SNAP_CONTEXT", cookie);
            }
        }
    }

    /// `KEY=VALUE` strings for `execve`, sorted by key.
    pub fn to_exec_env(&self) -> Result<Vec<CString>> {
        self.vars
            .iter()
            .map(|(k, v)| {
                let mut entry = Vec::with_capacity(k.len() + v.len() + 1);
                entry.extend_from_slice(k.as_bytes());
                entry.push(b'=');
                entry.extend_from_slice(v.as_bytes());
                CString::new(entry).map_err(|_| {
                    ConfineError::Environment(format!("variable {:?} contains a NUL byte", k))
                })
            })
            .collect()
    }
}
