//! Loading of precompiled syscall filters.
//!
//! Profiles are compiled elsewhere into raw classic-BPF programs stored as
//! `<bpf_dir>/<security tag>.bin`. A profile whose content is the marker
//! `@unrestricted` installs no filter. `global.bin`, when present, is loaded
//! on top of every confined application's own filter.

use crate::config::settings::ConfineConfig;
use crate::config::types::{ConfineError, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// `BPF_MAXINSNS`.
pub const MAX_INSTRUCTIONS: usize = 4096;
const INSTRUCTION_SIZE: usize = 8;
const UNRESTRICTED: &[u8] = b"@unrestricted";
const GLOBAL_PROFILE: &str = "global.bin";

/// A validated classic-BPF program.
#[derive(Clone, PartialEq, Eq)]
pub struct FilterProgram {
    source: PathBuf,
    bytes: Vec<u8>,
}

impl FilterProgram {
    pub fn parse(source: impl Into<PathBuf>, bytes: Vec<u8>) -> Result<Self> {
        let source = source.into();
        if bytes.is_empty() || bytes.len() % INSTRUCTION_SIZE != 0 {
            return Err(ConfineError::Policy(format!(
                "seccomp filter {} has invalid size {}",
                source.display(),
                bytes.len()
            )));
        }
        if bytes.len() > MAX_INSTRUCTIONS * INSTRUCTION_SIZE {
            return Err(ConfineError::Policy(format!(
                "seccomp filter {} is too large ({} instructions, at most {})",
                source.display(),
                bytes.len() / INSTRUCTION_SIZE,
                MAX_INSTRUCTIONS
            )));
        }
        Ok(Self { source, bytes })
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / INSTRUCTION_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    fn instructions(&self) -> Vec<libc::sock_filter> {
        self.bytes
            .chunks_exact(INSTRUCTION_SIZE)
            .map(|insn| libc::sock_filter {
                code: u16::from_ne_bytes([insn[0], insn[1]]),
                jt: insn[2],
                jf: insn[3],
                k: u32::from_ne_bytes([insn[4], insn[5], insn[6], insn[7]]),
            })
            .collect()
    }

    /// Install the program for the calling thread and its future children.
    pub fn load(&self) -> Result<()> {
        let mut insns = self.instructions();
        let prog = libc::sock_fprog {
            len: insns.len() as libc::c_ushort,
            filter: insns.as_mut_ptr(),
        };
        // SAFETY: `prog` points into `insns`, which outlives the call; the
        // kernel copies the program.
        let rc = unsafe {
            libc::prctl(
                libc::PR_SET_SECCOMP,
                libc::SECCOMP_MODE_FILTER as libc::c_ulong,
                &prog as *const libc::sock_fprog,
            )
        };
        if rc != 0 {
            return Err(ConfineError::Policy(format!(
                "cannot apply seccomp filter {}: {}",
                self.source.display(),
                std::io::Error::last_os_error()
            )));
        }
        log::debug!(
            "loaded seccomp filter {} ({} instructions)",
            self.source.display(),
            self.len()
        );
        Ok(())
    }
}

impl fmt::Debug for FilterProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterProgram")
            .field("source", &self.source)
            .field("instructions", &self.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeccompProfile {
    Unrestricted,
    Filter(FilterProgram),
}

impl SeccompProfile {
    fn from_bytes(source: &Path, bytes: Vec<u8>) -> Result<Self> {
        let content = bytes.strip_suffix(b"\n").unwrap_or(&bytes);
        if content == UNRESTRICTED {
            return Ok(SeccompProfile::Unrestricted);
        }
        FilterProgram::parse(source, bytes).map(SeccompProfile::Filter)
    }
}

/// Filters of one application, read before privileges are raised to load them.
#[derive(Debug, Clone)]
pub struct SeccompPlan {
    pub profile: SeccompProfile,
    pub global: Option<FilterProgram>,
}

impl SeccompPlan {
    /// Read the profile of `security_tag`. A missing profile is fatal; a
    /// missing global filter is not.
    pub fn for_security_tag(config: &ConfineConfig, security_tag: &str) -> Result<Self> {
        let path = config.seccomp_bpf_dir.join(format!("{}.bin", security_tag));
        let bytes = std::fs::read(&path).map_err(|e| {
            ConfineError::Policy(format!("cannot read seccomp profile {}: {}", path.display(), e))
        })?;
        let profile = SeccompProfile::from_bytes(&path, bytes)?;

        let global_path = config.seccomp_bpf_dir.join(GLOBAL_PROFILE);
        let global = match std::fs::read(&global_path) {
            Ok(bytes) => Some(FilterProgram::parse(&global_path, bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(ConfineError::Policy(format!(
                    "cannot read {}: {}",
                    global_path.display(),
                    e
                )))
            }
        };
        Ok(Self { profile, global })
    }

    pub fn is_unrestricted(&self) -> bool {
        self.profile == SeccompProfile::Unrestricted
    }

    /// Load the application filter and then the global one. Unrestricted
    /// applications get neither.
    pub fn install(&self) -> Result<()> {
        let program = match &self.profile {
            SeccompProfile::Unrestricted => {
                log::debug!("seccomp profile is unrestricted, not loading any filter");
                return Ok(());
            }
            SeccompProfile::Filter(program) => program,
        };
        program.load()?;
        if let Some(global) = &self.global {
            global.load()?;
        }
        Ok(())
    }
}

/// Required before loading a filter without `CAP_SYS_ADMIN`.
pub fn set_no_new_privs() -> Result<()> {
    // SAFETY: PR_SET_NO_NEW_PRIVS takes plain integer arguments.
    let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if rc != 0 {
        return Err(ConfineError::Policy(format!(
            "cannot set no_new_privs: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}
