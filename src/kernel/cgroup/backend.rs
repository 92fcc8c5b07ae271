//! Cgroup hierarchy detection for v1/v2 dual support.

use crate::config::settings::ConfineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupBackendType {
    V1,
    V2,
}

/// Detect the hierarchy that tracks snap processes: a mounted v1 freezer is
/// preferred, the unified hierarchy is the fallback.
pub fn detect_cgroup_backend(config: &ConfineConfig) -> Option<CgroupBackendType> {
    if config.freezer_cgroup_dir.join("cgroup.procs").exists() {
        return Some(CgroupBackendType::V1);
    }
    if config.unified_cgroup_dir.join("cgroup.controllers").exists() {
        return Some(CgroupBackendType::V2);
    }
    None
}

pub fn backend_type_name(backend_type: CgroupBackendType) -> &'static str {
    match backend_type {
        CgroupBackendType::V1 => "cgroup_v1",
        CgroupBackendType::V2 => "cgroup_v2",
    }
}
