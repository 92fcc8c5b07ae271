//! Short-lived children of the launcher: fork, reap and talk over pipes.
//!
//! The launcher is single-threaded, so forking without exec is safe. A child
//! never returns into the caller's code: it runs its closure and `_exit`s.

use crate::config::types::{ConfineError, Result};
use nix::fcntl::OFlag;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::fs::File;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Fork and run `child` in the new process; its return value is the exit code.
pub fn spawn(what: &str, child: impl FnOnce() -> i32) -> Result<Pid> {
    // SAFETY: the process is single-threaded and the child only runs `child`
    // before calling `_exit`.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            log::debug!("forked {} as pid {}", what, child);
            Ok(child)
        }
        Ok(ForkResult::Child) => {
            let code = catch_unwind(AssertUnwindSafe(child)).unwrap_or(101);
            // SAFETY: _exit skips atexit handlers and buffered I/O that belong to the parent.
            unsafe { libc::_exit(code) }
        }
        Err(e) => Err(ConfineError::Namespace(format!("cannot fork {}: {}", what, e))),
    }
}

/// Reap `pid` and return its exit code. Death by signal is an error.
pub fn wait_exit(pid: Pid, what: &str) -> Result<i32> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return Err(ConfineError::Namespace(format!(
                    "{} was killed by {}",
                    what, signal
                )))
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => {
                return Err(ConfineError::Namespace(format!(
                    "cannot wait for {}: {}",
                    what, e
                )))
            }
        }
    }
}

/// Ask the kernel to deliver `signal` when the parent dies.
pub fn set_parent_death_signal(signal: Signal) -> Result<()> {
    nix::sys::prctl::set_pdeathsig(signal).map_err(|e| {
        ConfineError::Namespace(format!("cannot set parent death signal: {}", e))
    })
}

/// A close-on-exec pipe as `(read end, write end)`.
pub fn pipe() -> Result<(File, File)> {
    let (read, write) = nix::unistd::pipe2(OFlag::O_CLOEXEC)
        .map_err(|e| ConfineError::Namespace(format!("cannot create pipe: {}", e)))?;
    Ok((File::from(read), File::from(write)))
}
