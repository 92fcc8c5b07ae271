//! The real kernel behind [`MountNamespaceHost`].

use crate::config::settings::ConfineConfig;
use crate::config::strategy::LaunchStrategy;
use crate::config::types::{ConfineError, Invocation, Result};
use crate::exec::delegate::{Delegate, RunOptions};
use crate::exec::launch::MountNamespaceHost;
use crate::kernel::cgroup::FreezerGroup;
use crate::kernel::mount::{bootstrap, fixups, propagation};
use crate::kernel::namespace::{
    self, Helper, JoinOutcome, MountMode, NamespaceRegistry, Preservation, SavedCwd,
};
use crate::policy::apparmor::AppArmorState;
use crate::policy::selinux;
use crate::utils::env_finalize::ExecEnvironment;
use std::path::Path;

pub struct KernelHost<'a> {
    config: &'a ConfineConfig,
    apparmor: &'a AppArmorState,
    delegate_env: ExecEnvironment,
    update_ns: Delegate,
    discard_ns: Delegate,
    helper: Option<Helper>,
    cwd: SavedCwd,
}

impl<'a> KernelHost<'a> {
    /// Both delegates are opened by the caller before any namespace change.
    pub fn new(
        config: &'a ConfineConfig,
        apparmor: &'a AppArmorState,
        delegate_env: ExecEnvironment,
        update_ns: Delegate,
        discard_ns: Delegate,
    ) -> Self {
        Self {
            config,
            apparmor,
            delegate_env,
            update_ns,
            discard_ns,
            helper: None,
            cwd: SavedCwd::capture(),
        }
    }

    fn registry(&self) -> NamespaceRegistry<'a> {
        NamespaceRegistry::new(self.config)
    }

    fn helper(&mut self) -> Result<&mut Helper> {
        self.helper
            .as_mut()
            .ok_or_else(|| ConfineError::Namespace("namespace helper is not running".to_string()))
    }

    fn update_ns_options(&self, inv: &Invocation, run_as: Option<(u32, u32)>) -> RunOptions<'a> {
        RunOptions {
            run_as,
            apparmor: Some((
                self.apparmor,
                self.config,
                format!("snap-update-ns.{}", inv.instance_name),
            )),
        }
    }
}

/// Whether any process of `instance` is alive. Without a tracking hierarchy
/// nothing can be in use.
fn freezer_occupied(config: &ConfineConfig, instance: &str) -> Result<bool> {
    match FreezerGroup::for_instance(config, instance) {
        Ok(group) => group.is_occupied(),
        Err(e) => {
            log::debug!("{}", e);
            Ok(false)
        }
    }
}

impl MountNamespaceHost for KernelHost<'_> {
    fn reassociate_with_init(&mut self) -> Result<()> {
        namespace::reassociate_with_pid1(self.config)
    }

    fn ensure_shared_propagation(&mut self) -> Result<()> {
        propagation::ensure_shared_snap_mount(self.config)
    }

    fn initialize_ns_dir(&mut self) -> Result<()> {
        propagation::initialize_ns_dir(self.config)?;
        selinux::relabel_run_dir(self.config)
    }

    fn resolve_strategy(&mut self, inv: &Invocation) -> Result<LaunchStrategy> {
        LaunchStrategy::resolve(self.config, inv)
    }

    fn start_helper(&mut self, inv: &Invocation) -> Result<()> {
        let helper = Helper::fork(&self.registry(), &inv.instance_name)?;
        self.helper = Some(helper);
        Ok(())
    }

    fn join_preserved(&mut self, inv: &Invocation, mode: MountMode) -> Result<JoinOutcome> {
        let config = self.config;
        let discard_ns = &self.discard_ns;
        let env = &self.delegate_env;
        self.registry().join_preserved(
            inv,
            mode,
            || freezer_occupied(config, &inv.instance_name),
            || {
                discard_ns.run(
                    &["--from-snap-confine", inv.instance_name.as_str()],
                    env,
                    RunOptions::default(),
                )
            },
        )
    }

    fn construct(&mut self, inv: &Invocation, mode: MountMode) -> Result<()> {
        log::debug!("unsharing the mount namespace (per-snap)");
        namespace::unshare_mount_ns()?;
        let options = self.update_ns_options(inv, None);
        bootstrap::populate_mount_ns(self.config, inv, mode, || {
            self.update_ns.run(
                &["--from-snap-confine", inv.instance_name.as_str()],
                &self.delegate_env,
                options,
            )
        })
    }

    fn preserve(&mut self, inv: &Invocation) -> Result<Preservation> {
        let registry = self.registry();
        registry.preserve(inv, self.helper()?)
    }

    fn apply_fixups(&mut self) -> Result<()> {
        fixups::fixup_var_lib(Path::new("/"))?;
        fixups::fixup_udev_tags(&self.config.udev_tags_dir)?;
        Ok(())
    }

    fn join_preserved_per_user(&mut self, inv: &Invocation, uid: u32) -> Result<JoinOutcome> {
        self.registry().join_preserved_per_user(inv, uid)
    }

    fn construct_per_user(&mut self, inv: &Invocation, uid: u32, gid: u32) -> Result<()> {
        log::debug!("unsharing the mount namespace (per-user)");
        namespace::unshare_mount_ns()?;
        let options = self.update_ns_options(inv, Some((uid, gid)));
        bootstrap::setup_user_mounts(self.config, inv, || {
            self.update_ns.run(
                &["--user-mounts", inv.instance_name.as_str()],
                &self.delegate_env,
                options,
            )
        })
    }

    fn preserve_per_user(&mut self, inv: &Invocation, uid: u32) -> Result<Preservation> {
        let registry = self.registry();
        registry.preserve_per_user(inv, uid, self.helper()?)
    }

    fn restore_working_directory(&mut self) -> Result<()> {
        self.cwd.restore(&self.config.void_dir)
    }

    fn join_freezer(&mut self, inv: &Invocation) -> Result<()> {
        FreezerGroup::for_instance(self.config, &inv.instance_name)?.join(std::process::id())
    }

    fn stop_helper(&mut self) -> Result<()> {
        match self.helper.take() {
            Some(helper) => helper.finish(),
            None => Ok(()),
        }
    }
}
