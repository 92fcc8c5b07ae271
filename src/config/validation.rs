//! Syntax checks for snap names, instance names and security tags.
//!
//! Only the shape of a name is checked here. Whether the snap is installed or
//! the profile exists is discovered later when the files are opened.

use crate::config::types::{ConfineError, Result};

const SNAP_NAME_MIN_LEN: usize = 2;
const SNAP_NAME_MAX_LEN: usize = 40;
const INSTANCE_KEY_MAX_LEN: usize = 10;

/// Validate a snap name: 2..=40 chars of `[a-z0-9-]`, at least one letter,
/// no leading, trailing or doubled hyphen.
pub fn validate_snap_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid("snap name cannot be empty"));
    }

    let mut has_letter = false;
    let mut prev_hyphen = false;
    for (i, c) in name.chars().enumerate() {
        match c {
            'a'..='z' => {
                has_letter = true;
                prev_hyphen = false;
            }
            '0'..='9' => prev_hyphen = false,
            '-' => {
                if i == 0 {
                    return Err(invalid("snap name cannot start with a dash"));
                }
                if prev_hyphen {
                    return Err(invalid("snap name cannot contain two consecutive dashes"));
                }
                prev_hyphen = true;
            }
            _ => {
                return Err(invalid(
                    "snap name must use lower case letters, digits or dashes",
                ))
            }
        }
    }

    if prev_hyphen {
        return Err(invalid("snap name cannot end with a dash"));
    }
    if !has_letter {
        return Err(invalid("snap name must contain at least one letter"));
    }
    if name.len() < SNAP_NAME_MIN_LEN {
        return Err(invalid("snap name must be longer than 1 character"));
    }
    if name.len() > SNAP_NAME_MAX_LEN {
        return Err(invalid("snap name must be shorter than 40 characters"));
    }
    Ok(())
}

/// Validate an instance key (the part after `_`): 1..=10 chars of `[a-z0-9]`.
pub fn validate_instance_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(invalid("instance key cannot be empty"));
    }
    if key.len() > INSTANCE_KEY_MAX_LEN {
        return Err(invalid("instance key must be shorter than 10 characters"));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(invalid(
            "instance key must use lower case letters or digits",
        ));
    }
    Ok(())
}

/// Validate `<snap>` or `<snap>_<key>`.
pub fn validate_instance_name(instance: &str) -> Result<()> {
    let mut parts = instance.splitn(2, '_');
    let snap = parts.next().unwrap_or_default();
    validate_snap_name(snap)?;
    if let Some(key) = parts.next() {
        if key.contains('_') {
            return Err(invalid("snap instance name can contain only one underscore"));
        }
        validate_instance_key(key)?;
    }
    Ok(())
}

pub fn snap_name_of(instance: &str) -> &str {
    instance.split('_').next().unwrap_or(instance)
}

/// A security tag has the form `snap.<instance>.<app>` or
/// `snap.<instance>.hook.<hook>` and must belong to `instance`.
pub fn verify_security_tag(tag: &str, instance: &str) -> bool {
    let rest = match tag
        .strip_prefix("snap.")
        .and_then(|r| r.strip_prefix(instance))
        .and_then(|r| r.strip_prefix('.'))
    {
        Some(rest) => rest,
        None => return false,
    };

    match rest.strip_prefix("hook.") {
        Some(hook) => is_valid_hook_name(hook),
        None => is_valid_app_name(rest),
    }
}

pub fn is_hook_security_tag(tag: &str) -> bool {
    // snap.<instance>.hook.<name>; the instance cannot contain dots.
    let mut parts = tag.splitn(4, '.');
    matches!(
        (parts.next(), parts.next(), parts.next(), parts.next()),
        (Some("snap"), Some(_), Some("hook"), Some(name)) if is_valid_hook_name(name)
    )
}

/// `[a-zA-Z0-9](-?[a-zA-Z0-9])*`
fn is_valid_app_name(name: &str) -> bool {
    dash_separated(name, |c| c.is_ascii_alphanumeric(), |c| c.is_ascii_alphanumeric())
}

/// `[a-z](-?[a-z0-9])*`
fn is_valid_hook_name(name: &str) -> bool {
    dash_separated(
        name,
        |c| c.is_ascii_lowercase(),
        |c| c.is_ascii_lowercase() || c.is_ascii_digit(),
    )
}

fn dash_separated(name: &str, first: impl Fn(char) -> bool, rest: impl Fn(char) -> bool) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if first(c) => {}
        _ => return false,
    }
    let mut prev_hyphen = false;
    for c in chars {
        if c == '-' {
            if prev_hyphen {
                return false;
            }
            prev_hyphen = true;
        } else if rest(c) {
            prev_hyphen = false;
        } else {
            return false;
        }
    }
    !prev_hyphen
}

fn invalid(msg: &str) -> ConfineError {
    ConfineError::Validation(msg.to_string())
}
