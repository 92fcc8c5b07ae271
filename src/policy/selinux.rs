//! SELinux integration for hosts that confine snap-confine as `snappy_t`.

use crate::config::settings::ConfineConfig;
use crate::config::types::{ConfineError, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::process::{Command, Stdio};

/// Domain of snap-confine itself.
pub const SNAP_CONFINE_TYPE: &str = "snappy_t";
/// Domain the application runs in after exec.
pub const UNCONFINED_SNAP_TYPE: &str = "snappy_unconfined_snap_t";

pub fn is_enabled(config: &ConfineConfig) -> bool {
    config.selinux_fs_dir.join("enforce").exists()
}

/// Exec context for a process currently running as `current`, or `None`
/// when no transition applies.
///
/// Contexts are `user:role:type[:level]`; the level may itself contain
/// colons and is kept as is.
pub fn exec_context_for(current: &str) -> Result<Option<String>> {
    let current = current.trim_end_matches(|c: char| c == '\n' || c == '\0');
    let fields: Vec<&str> = current.splitn(4, ':').collect();
    if fields.len() < 3 || fields[..3].iter().any(|f| f.is_empty()) {
        return Err(ConfineError::Policy(format!(
            "cannot parse selinux context {:?}",
            current
        )));
    }
    log::debug!("selinux type: {}", fields[2]);
    if fields[2] != SNAP_CONFINE_TYPE {
        return Ok(None);
    }

    let mut next = vec![fields[0], fields[1], UNCONFINED_SNAP_TYPE];
    if let Some(level) = fields.get(3) {
        next.push(level);
    }
    Ok(Some(next.join(":")))
}

/// Request the application domain for the next exec.
pub fn set_snap_execcon(config: &ConfineConfig) -> Result<()> {
    if !is_enabled(config) {
        log::debug!("selinux not enabled");
        return Ok(());
    }

    let current = std::fs::read_to_string(config.proc_path("self/attr/current")).map_err(|e| {
        ConfineError::Policy(format!("cannot obtain current process context: {}", e))
    })?;
    log::debug!("exec context: {}", current.trim_end_matches('\0').trim());

    let Some(next) = exec_context_for(&current)? else {
        return Ok(());
    };
    let exec_attr = config.proc_path("self/attr/exec");
    OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_CLOEXEC)
        .open(&exec_attr)
        .and_then(|mut file| file.write_all(next.as_bytes()))
        .map_err(|e| {
            ConfineError::Policy(format!("cannot set exec context to {}: {}", next, e))
        })?;
    log::debug!("context after next exec: {}", next);
    Ok(())
}

/// Restore file contexts below the run directory, staying on its filesystem.
pub fn relabel_run_dir(config: &ConfineConfig) -> Result<()> {
    if !is_enabled(config) {
        return Ok(());
    }

    let status = Command::new(&config.restorecon_path)
        .arg("-R")
        .arg("-x")
        .arg(&config.run_dir)
        .env_clear()
        .stdin(Stdio::null())
        .status()
        .map_err(|e| {
            ConfineError::Policy(format!(
                "cannot run {}: {}",
                config.restorecon_path.display(),
                e
            ))
        })?;
    if !status.success() {
        return Err(ConfineError::Policy(format!(
            "failed to restore context of {}: {}",
            config.run_dir.display(),
            status
        )));
    }
    log::debug!("restored selinux context of {}", config.run_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    fn fake_system(root: &Path, current: &str) -> ConfineConfig {
        let config = ConfineConfig {
            proc_dir: root.join("proc"),
            selinux_fs_dir: root.join("selinux"),
            run_dir: root.join("run"),
            ..ConfineConfig::default()
        };
        std::fs::create_dir_all(&config.selinux_fs_dir).unwrap();
        std::fs::write(config.selinux_fs_dir.join("enforce"), "1").unwrap();
        let attr = config.proc_dir.join("self/attr");
        std::fs::create_dir_all(&attr).unwrap();
        std::fs::write(attr.join("current"), current).unwrap();
        std::fs::write(attr.join("exec"), "").unwrap();
        config
    }

    #[test]
    fn context_rewrite() {
        assert_eq!(
            exec_context_for("system_u:system_r:snappy_t:s0\0").unwrap(),
            Some("system_u:system_r:snappy_unconfined_snap_t:s0".to_string())
        );
        assert_eq!(
            exec_context_for("unconfined_u:unconfined_r:snappy_t:s0-s0:c0.c1023").unwrap(),
            Some("unconfined_u:unconfined_r:snappy_unconfined_snap_t:s0-s0:c0.c1023".to_string())
        );
        assert_eq!(
            exec_context_for("user_u:user_r:snappy_t").unwrap(),
            Some("user_u:user_r:snappy_unconfined_snap_t".to_string())
        );
        assert_eq!(
            exec_context_for("unconfined_u:unconfined_r:unconfined_t:s0\n").unwrap(),
            None
        );
        assert!(exec_context_for("kernel").is_err());
        assert!(exec_context_for("a::c").is_err());
    }

    #[test]
    fn execcon_written_for_snap_confine_domain() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_system(dir.path(), "system_u:system_r:snappy_t:s0\0");
        set_snap_execcon(&config).unwrap();
        let written = std::fs::read_to_string(config.proc_dir.join("self/attr/exec")).unwrap();
        assert_eq!(written, "system_u:system_r:snappy_unconfined_snap_t:s0");
    }

    #[test]
    fn other_domains_keep_their_exec_context() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_system(dir.path(), "unconfined_u:unconfined_r:unconfined_t:s0");
        set_snap_execcon(&config).unwrap();
        let written = std::fs::read_to_string(config.proc_dir.join("self/attr/exec")).unwrap();
        assert!(written.is_empty());
    }

    #[test]
    fn disabled_selinux_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfineConfig {
            proc_dir: dir.path().join("missing-proc"),
            selinux_fs_dir: dir.path().join("missing"),
            restorecon_path: PathBuf::from("/nonexistent/restorecon"),
            ..ConfineConfig::default()
        };
        assert!(!is_enabled(&config));
        set_snap_execcon(&config).unwrap();
        relabel_run_dir(&config).unwrap();
    }

    #[test]
    fn relabel_reports_restorecon_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fake_system(dir.path(), "system_u:system_r:snappy_t:s0");

        config.restorecon_path = PathBuf::from("/nonexistent/restorecon");
        assert!(matches!(
            relabel_run_dir(&config),
            Err(ConfineError::Policy(msg)) if msg.starts_with("cannot run")
        ));

        config.restorecon_path = PathBuf::from("/bin/false");
        assert!(matches!(
            relabel_run_dir(&config),
            Err(ConfineError::Policy(msg)) if msg.starts_with("failed to restore context")
        ));

        config.restorecon_path = PathBuf::from("/bin/true");
        relabel_run_dir(&config).unwrap();
    }
}
