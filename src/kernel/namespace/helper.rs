//! Helper process that publishes mount namespaces into the registry.
//!
//! A process cannot bind-mount its own mount namespace file from inside that
//! namespace into a directory of the outer one, so before the launcher joins
//! or builds a per-snap namespace it forks a helper that stays behind. Once
//! the launcher is in the new namespace it asks the helper to bind
//! `/proc/<launcher>/ns/mnt` over the registry entry.
//!
//! Protocol: one command byte (plus a little-endian uid for per-user
//! captures) over a pipe, answered by one acknowledgement byte.

use super::registry::NamespaceRegistry;
use crate::config::types::{ConfineError, Result};
use crate::kernel::mount::MountOp;
use crate::kernel::process;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{getpid, getppid, Pid};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

const CMD_EXIT: u8 = b'x';
const CMD_CAPTURE_MOUNT_NS: u8 = b'm';
const CMD_CAPTURE_PER_USER_MOUNT_NS: u8 = b'u';

const ACK_OK: u8 = b'+';
const ACK_FAILED: u8 = b'!';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperCommand {
    CaptureMountNs,
    CapturePerUserMountNs(u32),
    Exit,
}

impl HelperCommand {
    fn encode(self) -> Vec<u8> {
        match self {
            HelperCommand::CaptureMountNs => vec![CMD_CAPTURE_MOUNT_NS],
            HelperCommand::CapturePerUserMountNs(uid) => {
                let mut buf = vec![CMD_CAPTURE_PER_USER_MOUNT_NS];
                buf.extend_from_slice(&uid.to_le_bytes());
                buf
            }
            HelperCommand::Exit => vec![CMD_EXIT],
        }
    }

    fn decode(input: &mut impl Read) -> std::io::Result<Option<Self>> {
        let mut cmd = [0u8; 1];
        if input.read(&mut cmd)? == 0 {
            return Ok(None);
        }
        let command = match cmd[0] {
            CMD_CAPTURE_MOUNT_NS => HelperCommand::CaptureMountNs,
            CMD_CAPTURE_PER_USER_MOUNT_NS => {
                let mut uid = [0u8; 4];
                input.read_exact(&mut uid)?;
                HelperCommand::CapturePerUserMountNs(u32::from_le_bytes(uid))
            }
            CMD_EXIT => HelperCommand::Exit,
            other => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("unknown helper command {:#x}", other),
                ))
            }
        };
        Ok(Some(command))
    }
}

/// Result of a preservation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preservation {
    /// The namespace is now reachable through the registry.
    Published,
    /// The helper is gone; the namespace stays private to this launch.
    Stale,
}

/// Owned handle of a running helper. The handle is valid exactly as long as
/// the helper process is alive.
#[derive(Debug)]
pub struct Helper {
    pid: Pid,
    commands: File,
    replies: File,
    lost: bool,
    finished: bool,
}

impl Helper {
    /// Fork the helper for `instance`. Must be called before the launcher
    /// leaves the namespace in which the registry directory is visible.
    pub fn fork(registry: &NamespaceRegistry<'_>, instance: &str) -> Result<Self> {
        let parent = getpid();
        let (cmd_rx, cmd_tx) = process::pipe()?;
        let (reply_rx, reply_tx) = process::pipe()?;
        let parent_ends = [cmd_tx.as_raw_fd(), reply_rx.as_raw_fd()];

        let pid = process::spawn("namespace helper", || {
            for fd in parent_ends {
                // SAFETY: the child owns a copy of the parent's descriptors and
                // never uses these two; closing them lets EOF signal parent death.
                unsafe {
                    libc::close(fd);
                }
            }
            helper_main(parent, &cmd_rx, &reply_tx, registry, instance)
        })?;
        drop(cmd_rx);
        drop(reply_tx);

        Ok(Self {
            pid,
            commands: cmd_tx,
            replies: reply_rx,
            lost: false,
            finished: false,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Liveness of the helper process. A reaped or vanished helper is dead.
    pub fn is_alive(&self) -> bool {
        if self.finished || self.lost {
            return false;
        }
        !matches!(kill(self.pid, None::<Signal>), Err(Errno::ESRCH))
    }

    pub fn capture_mount_ns(&mut self) -> Result<Preservation> {
        self.request(HelperCommand::CaptureMountNs)
    }

    pub fn capture_per_user_mount_ns(&mut self, uid: u32) -> Result<Preservation> {
        self.request(HelperCommand::CapturePerUserMountNs(uid))
    }

    fn request(&mut self, command: HelperCommand) -> Result<Preservation> {
        if !self.is_alive() {
            return Ok(self.mark_lost(command, "helper process is gone"));
        }
        if let Err(e) = self.commands.write_all(&command.encode()) {
            return Ok(self.mark_lost(command, &e.to_string()));
        }

        let mut ack = [0u8; 1];
        match self.replies.read(&mut ack) {
            Ok(0) => Ok(self.mark_lost(command, "helper closed its reply pipe")),
            Ok(_) if ack[0] == ACK_OK => Ok(Preservation::Published),
            Ok(_) => Err(ConfineError::Namespace(format!(
                "helper failed to perform {:?}",
                command
            ))),
            Err(e) => Ok(self.mark_lost(command, &e.to_string())),
        }
    }

    fn mark_lost(&mut self, command: HelperCommand, why: &str) -> Preservation {
        log::warn!(
            "cannot perform {:?}, namespace will not be preserved: {}",
            command,
            why
        );
        self.lost = true;
        Preservation::Stale
    }

    /// Tell the helper to exit and reap it. A helper that was already found
    /// dead is only reaped.
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        if !self.lost {
            if let Err(e) = self.commands.write_all(&HelperCommand::Exit.encode()) {
                log::debug!("cannot send exit command to helper: {}", e);
            }
        }
        let outcome = process::wait_exit(self.pid, "namespace helper");
        match (outcome, self.lost) {
            (Ok(0), _) => Ok(()),
            (_, true) => Ok(()),
            (Ok(code), false) => Err(ConfineError::Namespace(format!(
                "namespace helper exited with status {}",
                code
            ))),
            (Err(e), false) => Err(e),
        }
    }
}

impl Drop for Helper {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let _ = self.commands.write_all(&HelperCommand::Exit.encode());
        let _ = nix::sys::wait::waitpid(self.pid, None);
    }
}

fn helper_main(
    parent: Pid,
    commands: &File,
    replies: &File,
    registry: &NamespaceRegistry<'_>,
    instance: &str,
) -> i32 {
    if process::set_parent_death_signal(Signal::SIGINT).is_err() {
        return 1;
    }
    // The parent may have died before the death signal was armed.
    if getppid() != parent {
        return 1;
    }

    let source = registry.proc_ns_of(parent.as_raw());
    let mut commands = commands;
    let mut replies = replies;
    loop {
        let command = match HelperCommand::decode(&mut commands) {
            Ok(Some(command)) => command,
            Ok(None) => return 1,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => return 1,
        };
        let target = match command {
            HelperCommand::Exit => return 0,
            HelperCommand::CaptureMountNs => registry.ns_path(instance),
            HelperCommand::CapturePerUserMountNs(uid) => registry.per_user_ns_path(instance, uid),
        };
        let ack = match capture(&source, &target) {
            Ok(()) => ACK_OK,
            Err(e) => {
                log::error!("{}", e);
                ACK_FAILED
            }
        };
        if replies.write_all(&[ack]).is_err() {
            return 1;
        }
    }
}

/// Bind the namespace file `source` over the registry entry `target`.
fn capture(source: &Path, target: &Path) -> Result<()> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .mode(0o600)
        .custom_flags(libc::O_NOFOLLOW | libc::O_CLOEXEC)
        .open(target)
        .map_err(|e| {
            ConfineError::Namespace(format!(
                "cannot create registry entry {}: {}",
                target.display(),
                e
            ))
        })?;
    MountOp::bind(source, target, false).apply()
}
