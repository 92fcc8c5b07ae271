//! Fakes shared by the integration tests.

#![allow(dead_code)]

use snap_confine::config::types::{ConfineError, Invocation, LaunchRequest, Result};
use snap_confine::kernel::credentials::{IdentityOps, IdentitySnapshot};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

/// Credential model applying the kernel's setuid rules: a caller with
/// effective uid 0 may set any id, anyone else only an id it already holds.
#[derive(Clone)]
pub struct ModelIdentity {
    pub ids: Rc<RefCell<IdentitySnapshot>>,
    pub calls: Rc<RefCell<Vec<String>>>,
}

impl ModelIdentity {
    pub fn new(ids: IdentitySnapshot) -> Self {
        Self {
            ids: Rc::new(RefCell::new(ids)),
            calls: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn current(&self) -> IdentitySnapshot {
        *self.ids.borrow()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn refuse(what: &str) -> ConfineError {
        ConfineError::Privilege(format!("{}: EPERM", what))
    }
}

impl IdentityOps for ModelIdentity {
    fn snapshot(&self) -> Result<IdentitySnapshot> {
        Ok(self.current())
    }

    fn set_effective_uid(&mut self, uid: u32) -> Result<()> {
        self.record(format!("seteuid({})", uid));
        let mut ids = self.ids.borrow_mut();
        if ids.effective_uid != 0 && uid != ids.real_uid && uid != ids.saved_uid {
            return Err(Self::refuse("seteuid"));
        }
        ids.effective_uid = uid;
        Ok(())
    }

    fn set_effective_gid(&mut self, gid: u32) -> Result<()> {
        self.record(format!("setegid({})", gid));
        let mut ids = self.ids.borrow_mut();
        if ids.effective_uid != 0 && gid != ids.real_gid && gid != ids.saved_gid {
            return Err(Self::refuse("setegid"));
        }
        ids.effective_gid = gid;
        Ok(())
    }

    fn set_all_uids(&mut self, uid: u32) -> Result<()> {
        self.record(format!("setresuid({})", uid));
        let mut ids = self.ids.borrow_mut();
        let held = [ids.real_uid, ids.effective_uid, ids.saved_uid];
        if ids.effective_uid != 0 && !held.contains(&uid) {
            return Err(Self::refuse("setresuid"));
        }
        ids.real_uid = uid;
        ids.effective_uid = uid;
        ids.saved_uid = uid;
        Ok(())
    }

    fn set_all_gids(&mut self, gid: u32) -> Result<()> {
        self.record(format!("setresgid({})", gid));
        let mut ids = self.ids.borrow_mut();
        let held = [ids.real_gid, ids.effective_gid, ids.saved_gid];
        if ids.effective_uid != 0 && !held.contains(&gid) {
            return Err(Self::refuse("setresgid"));
        }
        ids.real_gid = gid;
        ids.effective_gid = gid;
        ids.saved_gid = gid;
        Ok(())
    }
}

pub fn request(instance: Option<&str>, tag: &str) -> LaunchRequest {
    LaunchRequest {
        instance_name: instance.map(str::to_string),
        security_tag: tag.to_string(),
        executable: PathBuf::from("/usr/lib/snapd/snap-exec"),
        args: vec!["hello".to_string()],
        ..LaunchRequest::default()
    }
}

pub fn hello() -> Invocation {
    Invocation::resolve(request(Some("hello"), "snap.hello.hello")).unwrap()
}
