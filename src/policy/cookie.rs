//! Per-snap cookie issued by snapd so the application can identify itself.

use crate::config::settings::ConfineConfig;

/// Read the cookie of `instance`. A missing or unreadable cookie is logged
/// and treated as absent.
pub fn read_cookie(config: &ConfineConfig, instance: &str) -> Option<String> {
    let path = config.cookie_dir.join(format!("snap.{}", instance));
    match std::fs::read_to_string(&path) {
        Ok(cookie) => {
            let cookie = cookie.trim().to_string();
            if cookie.is_empty() {
                log::debug!("cookie file {} is empty", path.display());
                return None;
            }
            Some(cookie)
        }
        Err(e) => {
            log::warn!("cannot read cookie file {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfineConfig {
            cookie_dir: dir.path().to_path_buf(),
            ..ConfineConfig::default()
        };
        assert_eq!(read_cookie(&config, "hello"), None);

        std::fs::write(dir.path().join("snap.hello"), "s3cr3t").unwrap();
        assert_eq!(read_cookie(&config, "hello").as_deref(), Some("s3cr3t"));

        std::fs::write(dir.path().join("snap.empty"), "").unwrap();
        assert_eq!(read_cookie(&config, "empty"), None);
    }
}
