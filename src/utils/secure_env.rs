//! Environment lookups that are safe in a setuid process.

use std::ffi::OsString;

/// Whether the kernel started this process in secure-execution mode
/// (setuid, setgid or file capabilities).
pub fn is_secure_execution() -> bool {
    // SAFETY: getauxval only reads the auxiliary vector.
    unsafe { libc::getauxval(libc::AT_SECURE) != 0 }
}

/// `secure_getenv(3)`: the variable is invisible in secure-execution mode.
pub fn secure_var_os(name: &str) -> Option<OsString> {
    if is_secure_execution() {
        log::debug!("ignoring {} in secure-execution mode", name);
        return None;
    }
    std::env::var_os(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_is_not_secure() {
        assert!(!is_secure_execution());
    }

    #[test]
    fn visible_outside_secure_execution() {
        std::env::set_var("SECURE_ENV_TEST_VISIBLE", "1");
        assert_eq!(
            secure_var_os("SECURE_ENV_TEST_VISIBLE"),
            Some(OsString::from("1"))
        );
        assert_eq!(secure_var_os("SECURE_ENV_TEST_NEVER_SET"), None);
    }
}
