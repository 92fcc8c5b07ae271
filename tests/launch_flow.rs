//! Ordering of the mount namespace sequence, checked against recording fakes
//! of the kernel host, the lock manager and the credential syscalls.

mod common;

use common::{hello, request, ModelIdentity};
use snap_confine::config::settings::ConfineConfig;
use snap_confine::config::strategy::{Distro, LaunchStrategy};
use snap_confine::config::types::{ConfineError, Invocation, Result};
use snap_confine::exec::{launch_request, prepare_mount_namespace, MountNamespaceHost};
use snap_confine::kernel::credentials::{IdentitySnapshot, Lowered, Privileges};
use snap_confine::kernel::lock::Locker;
use snap_confine::kernel::namespace::{JoinOutcome, MountMode, Preservation};
use std::cell::RefCell;
use std::rc::Rc;

type Events = Rc<RefCell<Vec<String>>>;

struct RecordingLocker {
    events: Events,
}

struct RecordingGuard {
    name: String,
    events: Events,
}

impl Drop for RecordingGuard {
    fn drop(&mut self) {
        self.events.borrow_mut().push(format!("unlock {}", self.name));
    }
}

impl Locker for RecordingLocker {
    type Guard = RecordingGuard;

    fn lock_global(&self) -> Result<RecordingGuard> {
        self.events.borrow_mut().push("lock global".to_string());
        Ok(RecordingGuard {
            name: "global".to_string(),
            events: self.events.clone(),
        })
    }

    fn lock_snap(&self, instance: &str) -> Result<RecordingGuard> {
        self.events.borrow_mut().push(format!("lock {}", instance));
        Ok(RecordingGuard {
            name: instance.to_string(),
            events: self.events.clone(),
        })
    }
}

struct FakeHost {
    events: Events,
    identity: ModelIdentity,
    preserved: bool,
    preserved_per_user: bool,
    preserve_per_user_flag: bool,
    fail_construct: bool,
    helper_gone: bool,
}

impl FakeHost {
    fn new(events: &Events, identity: &ModelIdentity) -> Self {
        Self {
            events: events.clone(),
            identity: identity.clone(),
            preserved: false,
            preserved_per_user: false,
            preserve_per_user_flag: false,
            fail_construct: false,
            helper_gone: false,
        }
    }

    fn push(&self, event: impl Into<String>) {
        self.events.borrow_mut().push(event.into());
    }
}

impl MountNamespaceHost for FakeHost {
    fn reassociate_with_init(&mut self) -> Result<()> {
        self.push("reassociate");
        Ok(())
    }

    fn ensure_shared_propagation(&mut self) -> Result<()> {
        self.push("shared propagation");
        Ok(())
    }

    fn initialize_ns_dir(&mut self) -> Result<()> {
        self.push("ns dir");
        Ok(())
    }

    fn resolve_strategy(&mut self, _inv: &Invocation) -> Result<LaunchStrategy> {
        self.push("strategy");
        Ok(LaunchStrategy {
            distro: Distro::Classic,
            mount_mode: MountMode::Normal,
            preserve_per_user: self.preserve_per_user_flag,
        })
    }

    fn start_helper(&mut self, inv: &Invocation) -> Result<()> {
        self.push(format!("start helper {}", inv.instance_name));
        Ok(())
    }

    fn join_preserved(&mut self, _inv: &Invocation, _mode: MountMode) -> Result<JoinOutcome> {
        self.push("join");
        Ok(if self.preserved {
            JoinOutcome::Joined
        } else {
            JoinOutcome::NotFound
        })
    }

    fn construct(&mut self, _inv: &Invocation, _mode: MountMode) -> Result<()> {
        self.push("construct");
        if self.fail_construct {
            return Err(ConfineError::Mount("cannot pivot_root".to_string()));
        }
        Ok(())
    }

    fn preserve(&mut self, _inv: &Invocation) -> Result<Preservation> {
        self.push("preserve");
        if self.helper_gone {
            return Ok(Preservation::Stale);
        }
        self.preserved = true;
        Ok(Preservation::Published)
    }

    fn apply_fixups(&mut self) -> Result<()> {
        self.push("fixups");
        Ok(())
    }

    fn join_preserved_per_user(&mut self, _inv: &Invocation, uid: u32) -> Result<JoinOutcome> {
        self.push(format!("join user {}", uid));
        Ok(if self.preserved_per_user {
            JoinOutcome::Joined
        } else {
            JoinOutcome::NotFound
        })
    }

    fn construct_per_user(&mut self, _inv: &Invocation, uid: u32, gid: u32) -> Result<()> {
        self.push(format!("construct user {}:{}", uid, gid));
        Ok(())
    }

    fn preserve_per_user(&mut self, _inv: &Invocation, uid: u32) -> Result<Preservation> {
        self.push(format!("preserve user {}", uid));
        if self.helper_gone {
            return Ok(Preservation::Stale);
        }
        self.preserved_per_user = true;
        Ok(Preservation::Published)
    }

    fn restore_working_directory(&mut self) -> Result<()> {
        self.push("cwd");
        Ok(())
    }

    fn join_freezer(&mut self, inv: &Invocation) -> Result<()> {
        let egid = self.identity.current().effective_gid;
        self.push(format!("freezer {} egid={}", inv.instance_name, egid));
        Ok(())
    }

    fn stop_helper(&mut self) -> Result<()> {
        self.push("stop helper");
        Ok(())
    }
}

fn lowered(identity: &ModelIdentity) -> Privileges<Lowered, ModelIdentity> {
    Privileges::capture(identity.clone())
        .unwrap()
        .lower_group_early()
        .unwrap()
}

fn run(host: &mut FakeHost, identity: &ModelIdentity, events: &Events) -> Result<LaunchStrategy> {
    let locker = RecordingLocker {
        events: events.clone(),
    };
    let mut privileges = lowered(identity);
    prepare_mount_namespace(host, &locker, &hello(), &mut privileges)
}

fn taken(events: &Events) -> Vec<String> {
    std::mem::take(&mut *events.borrow_mut())
}

const PROLOGUE: &[&str] = &[
    "reassociate",
    "lock global",
    "shared propagation",
    "ns dir",
    "unlock global",
    "lock hello",
    "strategy",
    "start helper hello",
    "join",
];

fn expect(tail: &[&str]) -> Vec<String> {
    PROLOGUE
        .iter()
        .chain(tail.iter())
        .map(|s| s.to_string())
        .collect()
}

#[test]
fn fresh_launch_by_user_without_per_user_preservation() {
    let events = Events::default();
    let identity = ModelIdentity::new(IdentitySnapshot::setuid_root(1000, 1000));
    let mut host = FakeHost::new(&events, &identity);

    let strategy = run(&mut host, &identity, &events).unwrap();
    assert!(!strategy.preserve_per_user);
    assert_eq!(
        taken(&events),
        expect(&[
            "construct",
            "preserve",
            "fixups",
            "join user 1000",
            "construct user 1000:1000",
            "cwd",
            "freezer hello egid=1000",
            "unlock hello",
            "stop helper",
        ])
    );

    // The second launch joins the per-snap namespace but rebuilds the
    // per-user one because it was never preserved.
    run(&mut host, &identity, &events).unwrap();
    assert_eq!(
        taken(&events),
        expect(&[
            "fixups",
            "join user 1000",
            "construct user 1000:1000",
            "cwd",
            "freezer hello egid=1000",
            "unlock hello",
            "stop helper",
        ])
    );
}

#[test]
fn fresh_launch_by_user_with_per_user_preservation() {
    let events = Events::default();
    let identity = ModelIdentity::new(IdentitySnapshot::setuid_root(1000, 1000));
    let mut host = FakeHost::new(&events, &identity);
    host.preserve_per_user_flag = true;

    run(&mut host, &identity, &events).unwrap();
    assert_eq!(
        taken(&events),
        expect(&[
            "construct",
            "preserve",
            "fixups",
            "join user 1000",
            "construct user 1000:1000",
            "preserve user 1000",
            "cwd",
            "freezer hello egid=1000",
            "unlock hello",
            "stop helper",
        ])
    );

    run(&mut host, &identity, &events).unwrap();
    assert_eq!(
        taken(&events),
        expect(&[
            "fixups",
            "join user 1000",
            "cwd",
            "freezer hello egid=1000",
            "unlock hello",
            "stop helper",
        ])
    );
}

#[test]
fn root_never_gets_a_per_user_namespace() {
    let events = Events::default();
    let identity = ModelIdentity::new(IdentitySnapshot::uniform(0, 0));
    let mut host = FakeHost::new(&events, &identity);
    host.preserve_per_user_flag = true;

    run(&mut host, &identity, &events).unwrap();
    assert_eq!(
        taken(&events),
        expect(&[
            "construct",
            "preserve",
            "fixups",
            "cwd",
            "freezer hello egid=0",
            "unlock hello",
            "stop helper",
        ])
    );
}

#[test]
fn freezer_is_joined_with_root_group_from_setgid_binary() {
    let events = Events::default();
    let mut ids = IdentitySnapshot::setuid_root(1000, 100);
    ids.effective_gid = 0;
    ids.saved_gid = 0;
    let identity = ModelIdentity::new(ids);
    let mut host = FakeHost::new(&events, &identity);

    let locker = RecordingLocker {
        events: events.clone(),
    };
    let mut privileges = lowered(&identity);
    assert_eq!(privileges.current().effective_gid, 100);

    prepare_mount_namespace(&mut host, &locker, &hello(), &mut privileges).unwrap();
    assert!(taken(&events).contains(&"freezer hello egid=0".to_string()));
    assert_eq!(privileges.current().effective_gid, 100);
    assert_eq!(identity.current().effective_gid, 100);
}

#[test]
fn failed_construction_releases_the_snap_lock() {
    let events = Events::default();
    let identity = ModelIdentity::new(IdentitySnapshot::setuid_root(1000, 1000));
    let mut host = FakeHost::new(&events, &identity);
    host.fail_construct = true;

    let err = run(&mut host, &identity, &events).unwrap_err();
    assert!(matches!(err, ConfineError::Mount(_)));
    assert_eq!(taken(&events), expect(&["construct", "unlock hello"]));
    assert!(!host.preserved);
}

#[test]
fn vanished_helper_keeps_the_launch_going() {
    let events = Events::default();
    let identity = ModelIdentity::new(IdentitySnapshot::setuid_root(1000, 1000));
    let mut host = FakeHost::new(&events, &identity);
    host.preserve_per_user_flag = true;
    host.helper_gone = true;

    let fresh = expect(&[
        "construct",
        "preserve",
        "fixups",
        "join user 1000",
        "construct user 1000:1000",
        "preserve user 1000",
        "cwd",
        "freezer hello egid=1000",
        "unlock hello",
        "stop helper",
    ]);
    run(&mut host, &identity, &events).unwrap();
    assert_eq!(taken(&events), fresh);
    assert!(!host.preserved);

    // Nothing was published, so the next launch builds both again.
    run(&mut host, &identity, &events).unwrap();
    assert_eq!(taken(&events), fresh);
}

#[test]
fn invalid_request_touches_no_host_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfineConfig {
        lock_dir: dir.path().join("lock"),
        ns_dir: dir.path().join("ns"),
        run_dir: dir.path().to_path_buf(),
        ..ConfineConfig::default()
    };

    let err = launch_request(&config, request(None, "snap.hello.hello")).unwrap_err();
    assert!(matches!(err, ConfineError::Validation(_)));
    let err = launch_request(&config, request(Some("hello"), "snap.other.app")).unwrap_err();
    assert!(matches!(err, ConfineError::Validation(_)));

    // No lock file and no namespace directory were created.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
