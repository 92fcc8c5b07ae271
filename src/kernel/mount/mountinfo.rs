//! Parser for `/proc/<pid>/mountinfo`.
//!
//! Format: `mount_id parent_id major:minor root mount_dir mount_opts
//! [optional fields...] - fs_type mount_source super_opts`

use crate::config::types::{ConfineError, Result};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfoEntry {
    pub mount_id: u32,
    pub parent_id: u32,
    pub dev_major: u32,
    pub dev_minor: u32,
    pub root: String,
    pub mount_dir: String,
    pub mount_opts: String,
    /// Propagation tags such as `shared:12` or `master:3`.
    pub optional_fields: Vec<String>,
    pub fs_type: String,
    pub mount_source: String,
    pub super_opts: String,
}

impl MountInfoEntry {
    pub fn is_shared(&self) -> bool {
        self.optional_fields.iter().any(|f| f.starts_with("shared:"))
    }

    /// Neither shared nor slave.
    pub fn is_private(&self) -> bool {
        !self
            .optional_fields
            .iter()
            .any(|f| f.starts_with("shared:") || f.starts_with("master:"))
    }

    pub fn device(&self) -> (u32, u32) {
        (self.dev_major, self.dev_minor)
    }
}

pub fn parse_mountinfo(content: &str) -> Result<Vec<MountInfoEntry>> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            parse_mountinfo_line(line).ok_or_else(|| {
                ConfineError::Mount(format!("cannot parse mountinfo line: {}", line))
            })
        })
        .collect()
}

pub fn read_mountinfo(path: &Path) -> Result<Vec<MountInfoEntry>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConfineError::Mount(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_mountinfo(&content)
}

fn parse_mountinfo_line(line: &str) -> Option<MountInfoEntry> {
    let mut fields = line.split(' ').filter(|f| !f.is_empty());

    let mount_id = fields.next()?.parse().ok()?;
    let parent_id = fields.next()?.parse().ok()?;
    let (major, minor) = fields.next()?.split_once(':')?;
    let dev_major = major.parse().ok()?;
    let dev_minor = minor.parse().ok()?;
    let root = unescape(fields.next()?);
    let mount_dir = unescape(fields.next()?);
    let mount_opts = fields.next()?.to_string();

    let mut optional_fields = Vec::new();
    loop {
        match fields.next()? {
            "-" => break,
            tag => optional_fields.push(tag.to_string()),
        }
    }

    let fs_type = unescape(fields.next()?);
    let mount_source = unescape(fields.next()?);
    // Some kernels leave super options empty.
    let super_opts = fields.next().unwrap_or_default().to_string();

    Some(MountInfoEntry {
        mount_id,
        parent_id,
        dev_major,
        dev_minor,
        root,
        mount_dir,
        mount_opts,
        optional_fields,
        fs_type,
        mount_source,
        super_opts,
    })
}

/// Undo the kernel's `\ooo` octal escaping of space, tab, newline and backslash.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() && is_octal(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') as u32 * 64
                + (bytes[i + 2] - b'0') as u32 * 8
                + (bytes[i + 3] - b'0') as u32;
            if let Ok(b) = u8::try_from(value) {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal(digits: &[u8]) -> bool {
    digits.len() == 3 && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}
