//! Concurrent launches of one snap, serialized by real flock locks.

mod common;

use common::{hello, ModelIdentity};
use snap_confine::config::strategy::{Distro, LaunchStrategy};
use snap_confine::config::types::{Invocation, Result};
use snap_confine::exec::{prepare_mount_namespace, MountNamespaceHost};
use snap_confine::kernel::credentials::{IdentitySnapshot, Privileges};
use snap_confine::kernel::lock::{LockManager, Locker};
use snap_confine::kernel::namespace::{JoinOutcome, MountMode, Preservation};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

const LAUNCHES: usize = 8;

/// Registry and event log shared by every launch, as the host's
/// `/run/snapd/ns` is.
#[derive(Default)]
struct SharedRegistry {
    preserved: bool,
    events: Vec<String>,
}

/// Host of one launch. The snap lock is the only thing keeping launches
/// apart; `inside` counts launches between taking and releasing it.
struct SharedHost {
    registry: Arc<Mutex<SharedRegistry>>,
    inside: Arc<AtomicUsize>,
}

impl SharedHost {
    fn push(&self, event: &str) {
        self.registry.lock().unwrap().events.push(event.to_string());
    }
}

impl MountNamespaceHost for SharedHost {
    fn reassociate_with_init(&mut self) -> Result<()> {
        Ok(())
    }

    fn ensure_shared_propagation(&mut self) -> Result<()> {
        Ok(())
    }

    fn initialize_ns_dir(&mut self) -> Result<()> {
        Ok(())
    }

    fn resolve_strategy(&mut self, _inv: &Invocation) -> Result<LaunchStrategy> {
        assert_eq!(
            self.inside.fetch_add(1, Ordering::SeqCst),
            0,
            "two launches hold the snap lock"
        );
        Ok(LaunchStrategy {
            distro: Distro::Classic,
            mount_mode: MountMode::Normal,
            preserve_per_user: false,
        })
    }

    fn start_helper(&mut self, _inv: &Invocation) -> Result<()> {
        Ok(())
    }

    fn join_preserved(&mut self, _inv: &Invocation, _mode: MountMode) -> Result<JoinOutcome> {
        if self.registry.lock().unwrap().preserved {
            self.push("join");
            Ok(JoinOutcome::Joined)
        } else {
            Ok(JoinOutcome::NotFound)
        }
    }

    fn construct(&mut self, _inv: &Invocation, _mode: MountMode) -> Result<()> {
        self.push("construct");
        // Widen the window a second constructor would need.
        thread::sleep(Duration::from_millis(20));
        Ok(())
    }

    fn preserve(&mut self, _inv: &Invocation) -> Result<Preservation> {
        self.registry.lock().unwrap().preserved = true;
        Ok(Preservation::Published)
    }

    fn apply_fixups(&mut self) -> Result<()> {
        Ok(())
    }

    fn join_preserved_per_user(&mut self, _inv: &Invocation, _uid: u32) -> Result<JoinOutcome> {
        Ok(JoinOutcome::NotFound)
    }

    fn construct_per_user(&mut self, _inv: &Invocation, _uid: u32, _gid: u32) -> Result<()> {
        Ok(())
    }

    fn preserve_per_user(&mut self, _inv: &Invocation, _uid: u32) -> Result<Preservation> {
        Ok(Preservation::Published)
    }

    fn restore_working_directory(&mut self) -> Result<()> {
        Ok(())
    }

    fn join_freezer(&mut self, _inv: &Invocation) -> Result<()> {
        self.inside.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop_helper(&mut self) -> Result<()> {
        Ok(())
    }
}

#[test]
fn exactly_one_concurrent_launch_constructs() {
    let dir = tempfile::tempdir().unwrap();
    let lock_dir = dir.path().join("lock");
    let registry = Arc::new(Mutex::new(SharedRegistry::default()));
    let inside = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(LAUNCHES));

    let handles: Vec<_> = (0..LAUNCHES)
        .map(|_| {
            let lock_dir = lock_dir.clone();
            let registry = Arc::clone(&registry);
            let inside = Arc::clone(&inside);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                // Each launch is its own process with its own descriptor.
                let locks = LockManager::new(&lock_dir).unwrap();
                let identity = ModelIdentity::new(IdentitySnapshot::setuid_root(1000, 1000));
                let mut privileges = Privileges::capture(identity)
                    .unwrap()
                    .lower_group_early()
                    .unwrap();
                let mut host = SharedHost { registry, inside };
                barrier.wait();
                prepare_mount_namespace(&mut host, &locks, &hello(), &mut privileges).unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let events = std::mem::take(&mut registry.lock().unwrap().events);
    assert_eq!(events.len(), LAUNCHES);
    assert_eq!(events[0], "construct");
    assert_eq!(events.iter().filter(|e| *e == "construct").count(), 1);
    assert_eq!(events.iter().filter(|e| *e == "join").count(), LAUNCHES - 1);
    assert_eq!(inside.load(Ordering::SeqCst), 0);
}

#[test]
fn different_snaps_do_not_block_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let locks = LockManager::new(dir.path()).unwrap();
    let _hello = locks.lock_snap("hello").unwrap();

    let lock_dir = dir.path().to_path_buf();
    let other = thread::spawn(move || {
        let locks = LockManager::new(&lock_dir).unwrap();
        let guard = locks.lock_snap("other").unwrap();
        guard.is_held()
    });
    assert!(other.join().unwrap());
}

#[test]
fn global_lock_is_released_for_the_next_launch() {
    let dir = tempfile::tempdir().unwrap();
    let locks = LockManager::new(dir.path()).unwrap();
    {
        let _global = locks.lock_global().unwrap();
    }

    let lock_dir = dir.path().to_path_buf();
    let next = thread::spawn(move || {
        let locks = LockManager::new(&lock_dir).unwrap();
        locks.lock_global().map(|guard| guard.is_held()).unwrap()
    });
    assert!(next.join().unwrap());
}
